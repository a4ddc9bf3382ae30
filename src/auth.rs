use subtle::ConstantTimeEq;

/// Static approver PIN. Unlocks the approval commands of an operator
/// session; the workflow itself never consults it.
#[derive(Clone)]
pub struct ApproverGate {
    pin: Option<String>,
}

impl ApproverGate {
    pub fn new(pin: Option<String>) -> Self {
        Self { pin }
    }

    /// No PIN configured means nothing can unlock.
    pub fn check(&self, attempt: &str) -> bool {
        match &self.pin {
            Some(pin) if !attempt.is_empty() => bool::from(pin.as_bytes().ct_eq(attempt.as_bytes())),
            _ => false,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.pin.is_some()
    }
}

impl std::fmt::Debug for ApproverGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApproverGate")
            .field("configured", &self.pin.is_some())
            .finish()
    }
}
