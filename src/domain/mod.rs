//! Domain vocabulary shared by the store, the workers and the upstream
//! adapters.
//!
//! Every enum here is stored as its lowercase string form so the database
//! triggers and the upstream adapters agree on spelling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

string_enum!(
    /// Airing season of a catalog row.
    Season {
        Winter => "winter",
        Spring => "spring",
        Summer => "summer",
        Fall => "fall",
        Unknown => "unknown",
    }
);

impl Season {
    /// Case-insensitive parse; anything unrecognised is `Unknown`.
    #[must_use]
    pub fn lossy(raw: &str) -> Self {
        raw.trim()
            .to_ascii_lowercase()
            .parse()
            .unwrap_or(Self::Unknown)
    }
}

string_enum!(
    LibraryStatus {
        Watching => "watching",
        Completed => "completed",
        OnHold => "on_hold",
        Dropped => "dropped",
        PlanToWatch => "plan_to_watch",
    }
);

impl LibraryStatus {
    /// Unknown remote statuses land in the plan-to-watch list.
    #[must_use]
    pub fn lossy(raw: &str) -> Self {
        raw.trim().parse().unwrap_or(Self::PlanToWatch)
    }
}

string_enum!(
    /// External list providers a user can link.
    Provider {
        MyAnimeList => "myanimelist",
        Anilist => "anilist",
    }
);

string_enum!(
    SyncAction {
        AddEntry => "add_entry",
        UpdateProgress => "update_progress",
        UpdateStatus => "update_status",
        DeleteEntry => "delete_entry",
    }
);

string_enum!(
    SyncStatus {
        Pending => "pending",
        Success => "success",
        Failed => "failed",
        Skipped => "skipped",
    }
);

string_enum!(
    ImportJobStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
        Failed => "failed",
    }
);

string_enum!(
    BulkJobStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
);

impl BulkJobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A MAL id that is known to be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MalId(i32);

impl MalId {
    /// Returns `None` for zero or negative ids, which mean "unknown".
    #[must_use]
    pub const fn new(id: i32) -> Option<Self> {
        if id > 0 { Some(Self(id)) } else { None }
    }

    #[must_use]
    pub fn from_option(id: Option<i32>) -> Option<Self> {
        id.and_then(Self::new)
    }

    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for MalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
