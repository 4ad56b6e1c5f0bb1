//! GitHub facade.

use super::Domain;

tool_schema! {
    SearchCode => "search_code" -> serde_json::Value {
        q: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    }
}

tool_schema! {
    GetFileContents => "get_file_contents" -> serde_json::Value {
        owner: String,
        repo: String,
        path: String,
        #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
        git_ref: Option<String>,
    }
}

tool_schema! {
    GetFileTree => "get_file_tree" -> serde_json::Value {
        owner: String,
        repo: String,
        recursive: bool,
    }
}

/// File suffixes indexed when the caller names none.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".py", ".js", ".md", ".json", ".yml", ".yaml"];

/// Upper bound on files fetched per repository.
pub const MAX_INDEXED_FILES: usize = 50;

/// A repository file fetched for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// Blob paths in a `get_file_tree` reply that end in one of `extensions`.
pub fn indexable_paths(tree: &serde_json::Value, extensions: &[&str]) -> Vec<String> {
    let Some(entries) = tree.get("tree").and_then(|t| t.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter(|entry| entry.get("type").and_then(|t| t.as_str()) == Some("blob"))
        .filter_map(|entry| entry.get("path").and_then(|p| p.as_str()))
        .filter(|path| extensions.iter().any(|ext| path.ends_with(ext)))
        .map(str::to_string)
        .collect()
}

/// GitHub code-search query scoped to one repository.
pub fn repo_query(owner: &str, repo: &str, query: &str) -> String {
    format!("{query} repo:{owner}/{repo}")
}

domain_client!(GithubClient, Domain::Github);

impl GithubClient {
    pub async fn search_code(&self, owner: &str, repo: &str, query: &str, path: Option<&str>) -> Option<serde_json::Value> {
        self.answer(&SearchCode {
            q: repo_query(owner, repo, query),
            path: path.map(str::to_string),
        })
        .await
    }

    pub async fn get_file_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Option<serde_json::Value> {
        self.answer(&GetFileContents {
            owner: owner.to_string(),
            repo: repo.to_string(),
            path: path.to_string(),
            git_ref: git_ref.map(str::to_string),
        })
        .await
    }

    /// Recursive repository tree.
    pub async fn get_file_tree(&self, owner: &str, repo: &str) -> Option<serde_json::Value> {
        self.answer(&GetFileTree {
            owner: owner.to_string(),
            repo: repo.to_string(),
            recursive: true,
        })
        .await
    }

    /// Fetch the text of up to [`MAX_INDEXED_FILES`] files whose names end in
    /// one of `extensions`. Files that cannot be read are skipped.
    pub async fn collect_sources(&self, owner: &str, repo: &str, extensions: &[&str]) -> Option<Vec<SourceFile>> {
        let tree = self.get_file_tree(owner, repo).await?;
        let paths = indexable_paths(&tree, extensions);
        tracing::info!(owner, repo, matched = paths.len(), "files to index");

        let mut sources = Vec::new();
        for path in paths.into_iter().take(MAX_INDEXED_FILES) {
            let reply = self.get_file_contents(owner, repo, &path, None).await;
            match reply.as_ref().and_then(|r| r.get("content")).and_then(|c| c.as_str()) {
                Some(content) => sources.push(SourceFile {
                    content: content.to_string(),
                    path,
                }),
                None => tracing::warn!(owner, repo, path = %path, "no content for file, skipping"),
            }
        }
        Some(sources)
    }
}
