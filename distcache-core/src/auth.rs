/// The SASL challenge/response mechanics are an external collaborator per
/// `spec.md` §1: the core only drives `step(challenge) -> response` in a
/// loop until the server stops replying `AuthContinue`.
pub trait AuthProvider: Send + Sync + 'static {
    /// The SASL mechanism name to advertise to the server (e.g. `"PLAIN"`).
    fn mechanism(&self) -> &str;
    /// The initial response sent alongside the mechanism name.
    fn initial_response(&self) -> Vec<u8>;
    /// Produce the next response for a server challenge. Called in a loop
    /// until the server's status is no longer `AuthContinue`.
    fn step(&mut self, challenge: &[u8]) -> Vec<u8>;
}

/// A stock `PLAIN` mechanism provider: `\0username\0password`, with no
/// further steps after the initial response. This is the default `one
/// implementation, room for custom injection` capability per `spec.md` §9;
/// anything requiring multi-step negotiation (e.g. `CRAM-MD5`) needs its own
/// [`AuthProvider`].
#[derive(Debug, Clone)]
pub struct PlainAuthProvider {
    zone: Option<String>,
    user_name: String,
    password: String,
}

impl PlainAuthProvider {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            zone: None,
            user_name: user_name.into(),
            password: password.into(),
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }
}

impl AuthProvider for PlainAuthProvider {
    fn mechanism(&self) -> &str {
        "PLAIN"
    }

    fn initial_response(&self) -> Vec<u8> {
        let zone = self.zone.as_deref().unwrap_or("");
        [zone, &self.user_name, &self.password].join("\0").into_bytes()
    }

    fn step(&mut self, _challenge: &[u8]) -> Vec<u8> {
        Vec::new()
    }
}
