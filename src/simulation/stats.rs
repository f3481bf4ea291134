use log::info;

/// Running totals for a simulation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub trains_spawned: u32,
    pub trains_stored: u32,
    pub trains_formed: u32,
    pub trains_force_created: u32,
    pub trains_completed: u32,
    pub requests_delayed: u32,
    pub requests_rejected: u32,
    pub maneuvers_completed: u32,
}

impl PoolStats {
    /// Log the end-of-run report
    pub fn log_summary(&self, elapsed: f32, active_trains: usize, stored_trains: usize) {
        info!("=== SIMULATION COMPLETE ===");
        info!("Elapsed time: {:.2}s", elapsed);
        info!("Total trains spawned: {}", self.trains_spawned);
        info!("Trains stored: {}", self.trains_stored);
        info!("Trains formed from storage: {}", self.trains_formed);
        info!("Trains force created: {}", self.trains_force_created);
        info!("Trains completed: {}", self.trains_completed);
        info!("Turntable maneuvers completed: {}", self.maneuvers_completed);
        info!("Requests delayed: {}", self.requests_delayed);
        info!("Requests rejected: {}", self.requests_rejected);
        info!("Active trains: {}", active_trains);
        info!("Stored trains: {}", stored_trains);
    }
}
