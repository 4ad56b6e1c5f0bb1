//! Application context: the set of domain clients a front end works with.
//!
//! Built once from the config and cloned into every handler. Cloning is
//! cheap; all clones share the same supervised servers.

use futures::future::join_all;

use crate::domains::rag::{IndexSummary, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::domains::{
    Domain, GithubClient, MobileClient, NewsClient, RagClient, TasksClient, WeatherClient,
};
use crate::tool_client::{ServerState, ToolClient, ToolError, ToolServersConfig};

/// Domain facades, one per configured tool server.
#[derive(Debug, Clone, Default)]
pub struct AppContext {
    pub weather: Option<WeatherClient>,
    pub news: Option<NewsClient>,
    pub mobile: Option<MobileClient>,
    pub rag: Option<RagClient>,
    pub github: Option<GithubClient>,
    pub tasks: Option<TasksClient>,
}

impl AppContext {
    /// Build a client for every configured domain. Nothing is started yet.
    ///
    /// Server entries that match no domain are logged and skipped.
    pub fn from_config(config: &ToolServersConfig) -> Result<Self, ToolError> {
        let mut ctx = Self::default();

        for (name, server) in &config.servers {
            let Some(domain) = Domain::from_key(name) else {
                tracing::warn!(server = %name, "configured server matches no domain, ignoring");
                continue;
            };

            let spec = server.transport_spec(name)?;
            let options = config.client_options(server, Some(domain.default_timeout()));
            tracing::debug!(
                server = %name,
                command = %spec.describe(),
                timeout_secs = options.call_timeout.as_secs(),
                "configured tool server"
            );
            ctx.insert(domain, ToolClient::for_process(name, spec, options));
        }

        Ok(ctx)
    }

    /// Install `client` as the facade for `domain`, replacing any previous one.
    pub fn insert(&mut self, domain: Domain, client: ToolClient) {
        match domain {
            Domain::Weather => self.weather = Some(WeatherClient::new(client)),
            Domain::News => self.news = Some(NewsClient::new(client)),
            Domain::Mobile => self.mobile = Some(MobileClient::new(client)),
            Domain::Ollama => self.rag = Some(RagClient::new(client)),
            Domain::Github => self.github = Some(GithubClient::new(client)),
            Domain::Tasks => self.tasks = Some(TasksClient::new(client)),
        }
    }

    /// The raw client for a domain, if configured.
    pub fn client(&self, domain: Domain) -> Option<&ToolClient> {
        match domain {
            Domain::Weather => self.weather.as_ref().map(WeatherClient::client),
            Domain::News => self.news.as_ref().map(NewsClient::client),
            Domain::Mobile => self.mobile.as_ref().map(MobileClient::client),
            Domain::Ollama => self.rag.as_ref().map(RagClient::client),
            Domain::Github => self.github.as_ref().map(GithubClient::client),
            Domain::Tasks => self.tasks.as_ref().map(TasksClient::client),
        }
    }

    fn clients(&self) -> impl Iterator<Item = (Domain, &ToolClient)> {
        Domain::ALL
            .into_iter()
            .filter_map(|domain| self.client(domain).map(|client| (domain, client)))
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start every client concurrently.
    ///
    /// Returns the domains that failed to start (partial startup is OK).
    pub async fn start_all(&self) -> Vec<(Domain, ToolError)> {
        let starts = self
            .clients()
            .map(|(domain, client)| async move { (domain, client.start().await) });

        let mut failures = Vec::new();
        for (domain, result) in join_all(starts).await {
            match result {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(domain = %domain, error = %e, "domain unavailable");
                    failures.push((domain, e));
                }
            }
        }

        tracing::info!(
            started = self.clients().count() - failures.len(),
            failed = failures.len(),
            "tool servers started"
        );
        failures
    }

    /// Stop every client.
    pub async fn shutdown_all(&self) {
        join_all(self.clients().map(|(_, client)| client.stop())).await;
        tracing::info!("all tool servers stopped");
    }

    /// Current state of every configured domain.
    pub fn status(&self) -> Vec<(Domain, ServerState)> {
        self.clients()
            .map(|(domain, client)| (domain, client.state()))
            .collect()
    }

    // ─── Workflows ───────────────────────────────────────────────────────

    /// Pull matching files from a GitHub repository into a vector store.
    ///
    /// Needs both the `github` and `ollama` servers. Each file is embedded
    /// with its path as a heading so answers can cite it.
    pub async fn index_repository(
        &self,
        owner: &str,
        repo: &str,
        store_name: &str,
        extensions: &[&str],
    ) -> Option<IndexSummary> {
        let (Some(github), Some(rag)) = (&self.github, &self.rag) else {
            tracing::warn!(owner, repo, "repository indexing needs the github and ollama servers");
            return None;
        };

        let sources = github.collect_sources(owner, repo, extensions).await?;
        let documents: Vec<String> = sources
            .iter()
            .map(|file| format!("File: {owner}/{repo}/{}\n\n{}", file.path, file.content))
            .collect();
        rag.index_documents(store_name, &documents, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
            .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
