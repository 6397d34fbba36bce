use std::fmt;

/// Client-side view of the current session's health.
///
/// `Lost` is terminal for a session; only a fresh handshake moves the state
/// back to `Starting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Liveness {
    #[default]
    Starting,
    Live,
    Lagging,
    Lost,
}

impl Liveness {
    pub fn is_lagging(self) -> bool {
        self == Self::Lagging
    }

    pub fn is_lost(self) -> bool {
        self == Self::Lost
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Live => "live",
            Self::Lagging => "lagging",
            Self::Lost => "lost",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
