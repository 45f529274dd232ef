use std::time::Duration;

/// Per-step timing and count snapshot attached to the world.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepProfiler {
    pub forces_time: Duration,
    pub broadphase_time: Duration,
    pub narrowphase_time: Duration,
    pub island_time: Duration,
    pub solver_time: Duration,
    pub integration_time: Duration,
    pub total_step_time: Duration,

    pub body_count: usize,
    pub contact_count: usize,
    pub active_island_count: usize,
}

impl StepProfiler {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) {
        let total_us = self.total_step_time.as_micros() as f32;
        if total_us < 1.0 {
            return;
        }

        let line = |label: &str, duration: Duration| {
            println!(
                "  {label:<14}{:.2} ms ({:.1}%)",
                duration.as_secs_f32() * 1000.0,
                (duration.as_micros() as f32 / total_us) * 100.0
            );
        };

        println!("--- Step Profile ---");
        println!(
            "Bodies: {}, Contacts: {}, Active islands: {}",
            self.body_count, self.contact_count, self.active_island_count
        );
        println!(
            "Total: {:.2} ms",
            self.total_step_time.as_secs_f32() * 1000.0
        );
        line("Forces:", self.forces_time);
        line("Broadphase:", self.broadphase_time);
        line("Narrowphase:", self.narrowphase_time);
        line("Islands:", self.island_time);
        line("Solver:", self.solver_time);
        line("Integration:", self.integration_time);
        println!("--------------------");
    }
}
