//! Mobile device facade. The server usually runs on another host over ssh.

use super::Domain;

tool_schema! {
    ListDevices => "mobile_list_available_devices" -> serde_json::Value {}
}

tool_schema! {
    TakeScreenshot => "mobile_take_screenshot" -> serde_json::Value {
        #[serde(skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    }
}

tool_schema! {
    LaunchApp => "mobile_launch_app" -> serde_json::Value {
        #[serde(skip_serializing_if = "Option::is_none")]
        device: Option<String>,
        #[serde(rename = "packageName")]
        package_name: String,
    }
}

domain_client!(MobileClient, Domain::Mobile);

impl MobileClient {
    pub async fn list_devices(&self) -> Option<serde_json::Value> {
        self.answer(&ListDevices {}).await
    }

    /// `device` defaults to the only connected device when `None`.
    pub async fn take_screenshot(&self, device: Option<&str>) -> Option<serde_json::Value> {
        self.answer(&TakeScreenshot {
            device: device.map(str::to_string),
        })
        .await
    }

    pub async fn launch_app(&self, device: Option<&str>, package_name: &str) -> Option<serde_json::Value> {
        self.answer(&LaunchApp {
            device: device.map(str::to_string),
            package_name: package_name.to_string(),
        })
        .await
    }
}
