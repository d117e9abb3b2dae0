use log::trace;

/// Level of the single interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptStatus {
    Enabled,
    Disabled,
}

/// The machine's interrupt line.
///
/// `disable` hands back the previous status so that nested critical
/// sections can `restore` exactly what they found.
#[derive(Debug)]
pub struct Interrupt {
    status: InterruptStatus,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Self {
            status: InterruptStatus::Enabled,
        }
    }

    /// Disables interrupts and returns the previous status.
    pub fn disable(&mut self) -> InterruptStatus {
        let previous = self.status;
        self.set_status(InterruptStatus::Disabled);
        previous
    }

    pub fn enable(&mut self) {
        self.set_status(InterruptStatus::Enabled);
    }

    pub fn restore(&mut self, status: InterruptStatus) {
        self.set_status(status);
    }

    pub fn status(&self) -> InterruptStatus {
        self.status
    }

    pub fn disabled(&self) -> bool {
        self.status == InterruptStatus::Disabled
    }

    pub fn enabled(&self) -> bool {
        self.status == InterruptStatus::Enabled
    }

    fn set_status(&mut self, status: InterruptStatus) {
        if self.status != status {
            trace!("interrupts {:?} -> {:?}", self.status, status);
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_disable_restores_outer_status() {
        let mut intr = Interrupt::new();
        let outer = intr.disable();
        let inner = intr.disable();
        assert_eq!(inner, InterruptStatus::Disabled);
        intr.restore(inner);
        assert!(intr.disabled());
        intr.restore(outer);
        assert!(intr.enabled());
    }
}
