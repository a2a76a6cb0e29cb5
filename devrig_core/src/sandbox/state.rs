/// The lifecycle of a single sandbox, per spec.md §4.D. Modeled as an enum
/// so illegal transitions (e.g. evaluating a disposed sandbox) are
/// unrepresentable at the call site, mirroring how a managed plugin's own
/// status enum gates dispatch one layer up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Constructed,
    Initialized,
    Active,
    Evicted,
    Disposed,
}

impl SandboxState {
    /// `evicted` is functionally equivalent to `disposed`: neither accepts
    /// further calls, and the manager must construct a fresh sandbox.
    pub fn is_live(self) -> bool {
        matches!(self, SandboxState::Initialized | SandboxState::Active)
    }
}
