//! Weather facade.

use serde::Deserialize;

use super::Domain;

tool_schema! {
    /// Current conditions for a city, optionally with a forecast.
    GetWeather => "get_weather" -> WeatherReport {
        city: String,
        include_forecast: bool,
    }
}

/// Answer of `get_weather`. `weather_info` is preformatted, one fact per line.
#[derive(Debug, Clone, Deserialize)]
pub struct WeatherReport {
    pub weather_info: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WeatherReport {
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.weather_info.lines().filter(|l| !l.trim().is_empty())
    }
}

domain_client!(
    /// Talks to the weather tool server.
    WeatherClient,
    Domain::Weather
);

impl WeatherClient {
    pub async fn get_weather(&self, city: &str, include_forecast: bool) -> Option<WeatherReport> {
        self.answer(&GetWeather {
            city: city.to_string(),
            include_forecast,
        })
        .await
    }
}
