//! WiFi password gate
//!
//! The password is revealed only after the guest has been sent to the
//! venue's social page once. The visit is remembered in a [`FlagStore`].

use std::sync::Arc;

use crate::error::ClientResult;
use crate::flags::FlagStore;

/// Flag key recording the social page visit
pub const SOCIAL_VISITED_KEY: &str = "has_visited_social";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueConfig {
    pub wifi_password: String,
    pub social_url: String,
}

impl VenueConfig {
    pub fn new(wifi_password: impl Into<String>, social_url: impl Into<String>) -> Self {
        Self {
            wifi_password: wifi_password.into(),
            social_url: social_url.into(),
        }
    }

    /// `WIFI_PASSWORD` and `SOCIAL_URL`; `None` unless both are set
    pub fn from_env() -> Option<Self> {
        let password = std::env::var("WIFI_PASSWORD").ok()?;
        let url = std::env::var("SOCIAL_URL").ok()?;
        Some(Self::new(password, url))
    }
}

/// Outcome of asking for the WiFi password
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealOutcome {
    /// Send the guest to this URL first; the visit is now recorded
    OpenSocial(String),
    Reveal(String),
}

#[derive(Debug, Clone)]
pub struct WifiGate {
    venue: VenueConfig,
    flags: Arc<dyn FlagStore>,
}

impl WifiGate {
    pub fn new(venue: VenueConfig, flags: Arc<dyn FlagStore>) -> Self {
        Self { venue, flags }
    }

    pub fn has_visited_social(&self) -> bool {
        self.flags.flag(SOCIAL_VISITED_KEY)
    }

    pub fn request_reveal(&self) -> ClientResult<RevealOutcome> {
        if self.has_visited_social() {
            return Ok(RevealOutcome::Reveal(self.venue.wifi_password.clone()));
        }
        self.flags.set(SOCIAL_VISITED_KEY, "true")?;
        tracing::debug!("Social page visit recorded");
        Ok(RevealOutcome::OpenSocial(self.venue.social_url.clone()))
    }

    /// Forget the visit
    pub fn reset(&self) -> ClientResult<()> {
        self.flags.remove(SOCIAL_VISITED_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::MemoryFlagStore;

    fn gate() -> WifiGate {
        WifiGate::new(
            VenueConfig::new("Cafe2024!", "https://social.example/venue"),
            Arc::new(MemoryFlagStore::new()),
        )
    }

    #[test]
    fn test_first_request_opens_social() {
        let gate = gate();
        assert_eq!(
            gate.request_reveal().unwrap(),
            RevealOutcome::OpenSocial("https://social.example/venue".into())
        );
        assert!(gate.has_visited_social());
        assert_eq!(
            gate.request_reveal().unwrap(),
            RevealOutcome::Reveal("Cafe2024!".into())
        );
    }

    #[test]
    fn test_reset_requires_visit_again() {
        let gate = gate();
        gate.request_reveal().unwrap();
        gate.reset().unwrap();
        assert!(matches!(
            gate.request_reveal().unwrap(),
            RevealOutcome::OpenSocial(_)
        ));
    }
}
