#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    // Interrupts
    TimerInterrupt,
}

/// Trait that the kernel implements to handle traps delivered by the machine.
pub trait TrapHandler {
    fn handle_trap(&mut self, cause: TrapCause);
}
