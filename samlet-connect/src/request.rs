use std::collections::HashMap;

/// Protocol-neutral snapshot of an inbound HTTP request, built once by
/// the transport layer and read-only afterwards. The only mutation a
/// consumer performs is the registry's provider write-back into
/// `get_data`.
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    /// Whether the agent reached us over TLS, proxy headers considered.
    pub https: bool,
    pub http_host: String,
    /// Path of the endpoint that received the request.
    pub script_name: String,
    pub get_data: HashMap<String, String>,
    pub post_data: HashMap<String, String>,
}

impl RequestDescriptor {
    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    /// The URL of the receiving endpoint itself, without query string.
    pub fn self_url(&self) -> String {
        format!("{}://{}{}", self.scheme(), self.http_host, self.script_name)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.get_data.get(name).map(String::as_str)
    }

    pub fn form_param(&self, name: &str) -> Option<&str> {
        self.post_data.get(name).map(String::as_str)
    }

    pub fn has_query_param(&self, name: &str) -> bool {
        self.get_data.contains_key(name)
    }
}
