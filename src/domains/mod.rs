//! Domain facades over [`ToolClient`].
//!
//! Each domain wraps one tool server with typed methods. Failures never
//! reach the caller as errors: they are logged and turned into `None`, and
//! the front end answers with [`Domain::unavailable_message`].

use std::time::Duration;

use crate::tool_client::ToolError;

// ─── Macros ──────────────────────────────────────────────────────────────────

/// Declare an argument struct bound to a tool name and output type.
///
/// Optional fields should carry `#[serde(skip_serializing_if = "Option::is_none")]`
/// so that unset arguments are left off the wire.
macro_rules! tool_schema {
    (
        $(#[$meta:meta])*
        $name:ident => $tool:literal -> $output:ty {
            $( $(#[$fmeta:meta])* $field:ident : $fty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $fty, )*
        }

        impl $crate::tool_client::ToolCall for $name {
            const NAME: &'static str = $tool;
            type Output = $output;
        }
    };
}

/// Declare a facade struct around a [`ToolClient`] for one domain.
macro_rules! domain_client {
    ($(#[$meta:meta])* $name:ident, $domain:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            client: $crate::tool_client::ToolClient,
        }

        impl $name {
            pub const DOMAIN: $crate::domains::Domain = $domain;

            pub fn new(client: $crate::tool_client::ToolClient) -> Self {
                Self { client }
            }

            pub fn client(&self) -> &$crate::tool_client::ToolClient {
                &self.client
            }

            async fn answer<C: $crate::tool_client::ToolCall>(&self, call: &C) -> Option<C::Output> {
                $crate::domains::answered(Self::DOMAIN, C::NAME, self.client.invoke(call).await)
            }
        }
    };
}

pub mod github;
pub mod mobile;
pub mod news;
pub mod rag;
pub mod tasks;
pub mod weather;

pub use github::GithubClient;
pub use mobile::MobileClient;
pub use news::NewsClient;
pub use rag::{RagClient, RerankMode};
pub use tasks::TasksClient;
pub use weather::WeatherClient;

// ─── Domain ──────────────────────────────────────────────────────────────────

/// The tool domains the assistant knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    Weather,
    News,
    Mobile,
    Ollama,
    Github,
    Tasks,
}

impl Domain {
    pub const ALL: [Domain; 6] = [
        Domain::Weather,
        Domain::News,
        Domain::Mobile,
        Domain::Ollama,
        Domain::Github,
        Domain::Tasks,
    ];

    /// Server name used in `tool-servers.yaml`.
    pub fn key(&self) -> &'static str {
        match self {
            Domain::Weather => "weather",
            Domain::News => "news",
            Domain::Mobile => "mobile",
            Domain::Ollama => "ollama",
            Domain::Github => "github",
            Domain::Tasks => "tasks",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Domain::Weather => "Weather",
            Domain::News => "News",
            Domain::Mobile => "Mobile devices",
            Domain::Ollama => "Knowledge base",
            Domain::Github => "GitHub",
            Domain::Tasks => "Tasks",
        }
    }

    /// Per-call timeout when the config does not set one.
    pub fn default_timeout(&self) -> Duration {
        match self {
            Domain::Weather | Domain::Tasks => Duration::from_secs(10),
            Domain::News | Domain::Mobile | Domain::Github => Duration::from_secs(30),
            // RAG answers go through a local LLM
            Domain::Ollama => Duration::from_secs(60),
        }
    }

    pub fn from_key(key: &str) -> Option<Domain> {
        Domain::ALL.into_iter().find(|d| d.key() == key)
    }

    /// Apology shown to the user when the domain produced no answer.
    pub fn unavailable_message(&self) -> &'static str {
        match self {
            Domain::Weather => "Sorry, the weather service is unavailable right now. Please try again later.",
            Domain::News => "Sorry, news is unavailable right now. Please try again later.",
            Domain::Mobile => "Sorry, the mobile device service is unavailable right now.",
            Domain::Ollama => "Sorry, the knowledge base is unavailable right now. Please try again later.",
            Domain::Github => "Sorry, GitHub is unavailable right now. Please try again later.",
            Domain::Tasks => "Sorry, the task tracker is unavailable right now.",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Turn a call outcome into the "no answer" sentinel, logging the failure.
pub(crate) fn answered<T>(domain: Domain, tool: &str, outcome: Result<T, ToolError>) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(
                domain = %domain,
                tool,
                error = %e,
                transient = e.is_transient(),
                "tool call produced no answer"
            );
            None
        }
    }
}

// ─── Test Support ────────────────────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────
