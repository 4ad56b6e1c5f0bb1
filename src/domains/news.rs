//! News facade.

use super::Domain;

tool_schema! {
    #[derive(Default)]
    GetNews => "get_news" -> serde_json::Value {
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    }
}

domain_client!(NewsClient, Domain::News);

impl NewsClient {
    /// Headlines, filtered by category and/or a free-text query.
    pub async fn get_news(&self, request: GetNews) -> Option<serde_json::Value> {
        self.answer(&request).await
    }

    pub async fn headlines(&self, category: &str, limit: u32) -> Option<serde_json::Value> {
        self.get_news(GetNews {
            category: Some(category.to_string()),
            limit: Some(limit),
            ..GetNews::default()
        })
        .await
    }
}
