/// Which hosts a fan-out of remote calls reached and which it didn't.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl HostReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, host: &str, ok: bool) {
        if ok {
            self.succeeded.push(host.to_string());
        } else {
            self.failed.push(host.to_string());
        }
    }

    /// Whether every host was reached.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
