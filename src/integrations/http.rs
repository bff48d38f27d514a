//! 通用 HTTP 集成模块
//!
//! 由 `IntegrationProfile` 驱动：初始化时校验凭据并探测连通性，
//! 健康检查执行一次 GET 探测，`execute` 把操作映射为上游请求。

use super::profiles::{AuthScheme, IntegrationProfile};
use crate::modules::{
    CapabilityDescriptor, HealthReport, HttpMethod, Module, ModuleConfig, ModuleInfo, ModuleState,
    ModuleStatus,
};
use crate::{Result, SocError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use semver::Version;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info};

/// 默认上游请求超时（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const AUTHOR: &str = "SOC Hub";

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// 通用 HTTP 集成
#[derive(Debug)]
pub struct HttpIntegration {
    profile: &'static IntegrationProfile,
    state: ModuleState,
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpIntegration {
    /// 创建集成实例
    ///
    /// 只构建 HTTP 客户端，不访问网络；凭据在 `initialize` 中校验
    pub fn new(profile: &'static IntegrationProfile, config: ModuleConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.get_or("timeout", DEFAULT_TIMEOUT_SECS));
        let verify_ssl: bool = config.get_or("verify_ssl", true);

        let base_url = config
            .get_str(profile.base_url_key)
            .unwrap_or(profile.base_url)
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;

        Ok(Self {
            profile,
            state: ModuleState::new(config),
            client,
            base_url,
            timeout,
        })
    }

    pub fn profile(&self) -> &'static IntegrationProfile {
        self.profile
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 缺失或为空的必需配置项
    pub fn missing_keys(&self) -> Vec<&'static str> {
        self.profile
            .required_keys
            .iter()
            .copied()
            .filter(|key| self.state.config().get_str(key).is_none())
            .collect()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let api_key = self.state.config().get_str("api_key").unwrap_or_default();
        match self.profile.auth {
            AuthScheme::Header(name) => request.header(name, api_key),
            AuthScheme::Bearer => request.bearer_auth(api_key),
            AuthScheme::QueryParam(name) => request.query(&[(name, api_key)]),
        }
    }

    /// 连通性探测，传输错误转换为 error 报告
    async fn probe(&self) -> HealthReport {
        let request = self.authorize(self.client.get(self.url(self.profile.probe_path)));

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                let mut report =
                    HealthReport::healthy(format!("Connected to {}", self.profile.display_name));
                for (field, key) in self.profile.probe_details {
                    if let Some(value) = self.state.config().get_str(key) {
                        report = report.with_detail(field, value);
                    }
                }
                report
            }
            Ok(response) => HealthReport::unhealthy(format!(
                "{} returned status code {}",
                self.profile.display_name,
                response.status().as_u16()
            )),
            Err(e) => HealthReport::error(e.to_string()),
        }
    }
}

/// 展开路径模板中的 `{key}` 占位符
///
/// 取值优先来自调用参数（使用后移除），其次来自模块配置
pub fn expand_path(template: &str, params: &mut Map<String, Value>, config: &ModuleConfig) -> Result<String> {
    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let end = rest[start..]
            .find('}')
            .map(|offset| start + offset)
            .ok_or_else(|| SocError::config(&format!("Unterminated placeholder in path '{}'", template)))?;

        expanded.push_str(&rest[..start]);
        let key = &rest[start + 1..end];

        let value = match params.remove(key) {
            Some(Value::String(value)) => value,
            Some(Value::Null) | None => config
                .get_str(key)
                .map(str::to_string)
                .ok_or_else(|| SocError::config(&format!("Missing parameter '{}' for path '{}'", key, template)))?,
            Some(other) => other.to_string(),
        };
        if value.is_empty() || value.contains(['/', '?', '#']) {
            return Err(SocError::config(&format!(
                "Invalid value for path parameter '{}': {:?}",
                key, value
            )));
        }

        expanded.push_str(&value);
        rest = &rest[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

#[async_trait]
impl Module for HttpIntegration {
    fn module_id(&self) -> &str {
        self.profile.id
    }

    async fn get_info(&self) -> Result<ModuleInfo> {
        let (major, minor, patch) = self.profile.version;
        Ok(ModuleInfo {
            name: self.profile.display_name.to_string(),
            version: Version::new(major, minor, patch),
            description: self.profile.description.to_string(),
            author: AUTHOR.to_string(),
            capabilities: self.profile.capabilities.to_vec(),
            requires_api_key: self.profile.requires_api_key(),
            status: self.state.status(),
        })
    }

    async fn initialize(&mut self) -> Result<()> {
        let missing = self.missing_keys();
        if !missing.is_empty() {
            error!("{} missing required configuration: {}", self.profile.display_name, missing.join(", "));
            self.state.mark_error();
            return Err(SocError::init(
                self.profile.id,
                &format!("missing required configuration: {}", missing.join(", ")),
            ));
        }

        if self.profile.probe_on_init {
            let report = self.probe().await;
            if !report.is_healthy() {
                self.state.mark_error();
                return Err(SocError::init(
                    self.profile.id,
                    &format!("connectivity check failed: {}", report.message),
                ));
            }
        }

        self.state.mark_active();
        info!("{} module initialized successfully", self.profile.display_name);
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthReport> {
        let missing = self.missing_keys();
        if !missing.is_empty() {
            return Ok(HealthReport::error(format!("Not configured: {}", missing.join(", "))));
        }
        Ok(self.probe().await)
    }

    fn get_capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.profile
            .operations
            .iter()
            .map(|entry| CapabilityDescriptor::new(entry.name, entry.description, entry.route, entry.method))
            .collect()
    }

    fn get_status(&self) -> ModuleStatus {
        self.state.status()
    }

    fn config(&self) -> &ModuleConfig {
        self.state.config()
    }

    fn operations(&self) -> Vec<&'static str> {
        self.profile.operations.iter().map(|entry| entry.name).collect()
    }

    async fn execute(&self, operation: &str, params: Value) -> Result<Value> {
        let entry = self
            .profile
            .operation(operation)
            .ok_or_else(|| SocError::UnsupportedOperation {
                module: self.profile.id.to_string(),
                operation: operation.to_string(),
            })?;

        if !self.is_initialized() {
            return Err(SocError::probe(
                self.profile.id,
                &format!("module is {}, cannot execute '{}'", self.state.status(), operation),
            ));
        }

        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(SocError::config(&format!(
                    "Parameters for '{}' must be an object, got {}",
                    operation, other
                )))
            }
        };

        let mut params: Map<String, Value> = params
            .into_iter()
            .map(|(key, value)| (entry.upstream_param(&key).to_string(), value))
            .collect();

        let path = expand_path(entry.upstream_path, &mut params, self.state.config())?;
        let request = self
            .client
            .request(entry.upstream_method.into(), self.url(&path));
        let request = match entry.upstream_method {
            HttpMethod::Get | HttpMethod::Delete => request.query(&query_pairs(&params)),
            _ => request.json(&Value::Object(params)),
        };

        debug!("{} {} {}", self.profile.id, entry.upstream_method.as_str(), path);
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(SocError::probe(
                self.profile.id,
                &format!("{} returned status code {} for '{}'", self.profile.display_name, status.as_u16(), operation),
            ));
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::profiles::{ABUSEIPDB, BUILTIN_PROFILES, LIMACHARLIE, THEHIVE, URLSCAN, VIRUSTOTAL};
    use crate::modules::{validate_capabilities, HealthState};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// 本地上游桩：每个连接应答同一个固定响应，并把收到的原始请求送回测试
    async fn upstream_stub(status: u16, body: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                let _ = sender.send(request);
                let response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", address), receiver)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = socket.read(&mut chunk).await.unwrap_or(0);
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);

            let text = String::from_utf8_lossy(&buffer).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let body_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let line = line.to_ascii_lowercase();
                        line.strip_prefix("content-length:")
                            .map(|value| value.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buffer.len() >= header_end + 4 + body_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buffer).to_string()
    }

    fn stub_config(base_url: &str) -> ModuleConfig {
        ModuleConfig::new()
            .with("api_key", "secret")
            .with("base_url", base_url)
            .with("timeout", 5)
    }

    fn integration(profile: &'static IntegrationProfile, config: ModuleConfig) -> HttpIntegration {
        HttpIntegration::new(profile, config).unwrap()
    }

    #[test]
    fn test_builtin_capabilities_match_operations() {
        for profile in BUILTIN_PROFILES {
            let module = integration(profile, ModuleConfig::new());
            assert!(validate_capabilities(&module).is_ok(), "{} capabilities", profile.id);
            assert_eq!(module.get_status(), ModuleStatus::Initializing);
        }
    }

    #[test]
    fn test_capability_wire_shape() {
        let module = integration(&VIRUSTOTAL, ModuleConfig::new());
        let capabilities = serde_json::to_value(module.get_capabilities()).unwrap();
        assert_eq!(
            capabilities[0],
            json!({
                "name": "analyze_file_hash",
                "description": "Analyze a file by hash",
                "endpoint": "/api/v1/virustotal/files/{hash}",
                "method": "GET"
            })
        );
    }

    #[tokio::test]
    async fn test_info_reflects_profile() {
        let module = integration(&LIMACHARLIE, ModuleConfig::new());
        let info = module.get_info().await.unwrap();
        assert_eq!(info.name, "LimaCharlie");
        assert_eq!(info.version, Version::new(1, 0, 0));
        assert!(info.requires_api_key);
        assert_eq!(info.status, ModuleStatus::Initializing);
        assert_eq!(info.capabilities.len(), 3);
    }

    #[test]
    fn test_config_overrides() {
        let module = integration(
            &THEHIVE,
            ModuleConfig::new()
                .with("api_url", "https://hive.example.org/")
                .with("timeout", 5),
        );
        assert_eq!(module.base_url(), "https://hive.example.org");
        assert_eq!(module.timeout(), Duration::from_secs(5));

        let module = integration(&VIRUSTOTAL, ModuleConfig::new());
        assert_eq!(module.base_url(), "https://www.virustotal.com/api/v3");
        assert_eq!(module.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[tokio::test]
    async fn test_initialize_without_credentials_fails() {
        let mut module = integration(&LIMACHARLIE, ModuleConfig::new().with("api_key", "key"));
        assert_eq!(module.missing_keys(), vec!["organization_id"]);

        let result = module.initialize().await;
        assert!(matches!(result, Err(SocError::Init { .. })));
        assert_eq!(module.get_status(), ModuleStatus::Error);

        let health = module.health_check().await.unwrap();
        assert_eq!(health.status, HealthState::Error);
    }

    #[tokio::test]
    async fn test_initialize_without_probe() {
        let mut module = integration(&URLSCAN, ModuleConfig::new().with("api_key", "key"));
        module.initialize().await.unwrap();
        assert_eq!(module.get_status(), ModuleStatus::Active);
        assert!(module.is_initialized());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_error_report() {
        let config = ModuleConfig::new()
            .with("api_key", "key")
            .with("base_url", "http://127.0.0.1:1")
            .with("timeout", 2);
        let mut module = integration(&VIRUSTOTAL, config);

        let health = module.health_check().await.unwrap();
        assert_eq!(health.status, HealthState::Error);

        assert!(module.initialize().await.is_err());
        assert_eq!(module.get_status(), ModuleStatus::Error);
    }

    #[tokio::test]
    async fn test_successful_upstream_activates_module() {
        let (base_url, mut requests) = upstream_stub(200, r#"{"data": {}}"#).await;
        let mut module = integration(&VIRUSTOTAL, stub_config(&base_url));

        module.initialize().await.unwrap();
        assert_eq!(module.get_status(), ModuleStatus::Active);

        let request = requests.recv().await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /users/current "));
        assert!(request.contains("x-apikey: secret"));

        let health = module.health_check().await.unwrap();
        assert_eq!(health.status, HealthState::Healthy);
        assert_eq!(health.message, "Connected to VirusTotal");
    }

    #[tokio::test]
    async fn test_non_success_status_is_unhealthy() {
        let (base_url, _requests) = upstream_stub(500, r#"{"error": "boom"}"#).await;
        let mut module = integration(&VIRUSTOTAL, stub_config(&base_url));

        let health = module.health_check().await.unwrap();
        assert_eq!(health.status, HealthState::Unhealthy);
        assert!(health.message.contains("500"));

        let result = module.initialize().await;
        assert!(matches!(result, Err(SocError::Init { .. })));
        assert_eq!(module.get_status(), ModuleStatus::Error);
    }

    #[tokio::test]
    async fn test_execute_get_sends_query() {
        let (base_url, mut requests) =
            upstream_stub(200, r#"{"data": {"abuseConfidenceScore": 0}}"#).await;
        let mut module = integration(&ABUSEIPDB, stub_config(&base_url));
        module.initialize().await.unwrap();
        requests.recv().await.unwrap();

        let result = module
            .execute("check_ip", json!({"ip": "1.2.3.4", "maxAgeInDays": 30}))
            .await
            .unwrap();
        assert_eq!(result, json!({"data": {"abuseConfidenceScore": 0}}));

        let request = requests.recv().await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert!(request_line.starts_with("GET /check?"));
        assert!(request_line.contains("ipAddress=1.2.3.4"));
        assert!(request_line.contains("maxAgeInDays=30"));
        assert!(!request_line.contains("ip=1.2.3.4"));
        assert!(request.to_ascii_lowercase().contains("key: secret"));
    }

    #[tokio::test]
    async fn test_execute_post_sends_json_body() {
        let (base_url, mut requests) = upstream_stub(200, r#"{"data": {"id": "u-1"}}"#).await;
        let mut module = integration(&VIRUSTOTAL, stub_config(&base_url));
        module.initialize().await.unwrap();
        requests.recv().await.unwrap();

        let result = module
            .execute("scan_url", json!({"url": "http://example.com"}))
            .await
            .unwrap();
        assert_eq!(result["data"]["id"], "u-1");

        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("POST /urls "));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"url":"http://example.com"}"#));
    }

    #[tokio::test]
    async fn test_execute_guards() {
        let module = integration(&URLSCAN, ModuleConfig::new().with("api_key", "key"));
        assert!(matches!(
            module.execute("delete_everything", Value::Null).await,
            Err(SocError::UnsupportedOperation { .. })
        ));
        // 未初始化
        assert!(matches!(
            module.execute("search", json!({"q": "domain:example.com"})).await,
            Err(SocError::Probe { .. })
        ));
    }

    #[test]
    fn test_expand_path() {
        let config = ModuleConfig::new().with("organization_id", "org-1");
        let mut params = json!({"sensor_id": "s-42", "limit": 10})
            .as_object()
            .cloned()
            .unwrap();

        let path = expand_path("/v1/{organization_id}/sensors/{sensor_id}", &mut params, &config).unwrap();
        assert_eq!(path, "/v1/org-1/sensors/s-42");
        // 已用于路径的参数被移除
        assert!(!params.contains_key("sensor_id"));
        assert!(params.contains_key("limit"));

        let mut params = Map::new();
        assert!(expand_path("/files/{hash}", &mut params, &config).is_err());

        let mut params = json!({"hash": "../admin"}).as_object().cloned().unwrap();
        assert!(expand_path("/files/{hash}", &mut params, &config).is_err());

        let mut params = json!({"pid": 1234}).as_object().cloned().unwrap();
        assert_eq!(expand_path("/p/{pid}", &mut params, &config).unwrap(), "/p/1234");

        let mut params = Map::new();
        assert_eq!(expand_path("/api/case", &mut params, &config).unwrap(), "/api/case");
    }

    #[test]
    fn test_query_pairs() {
        let params = json!({"ipAddress": "1.2.3.4", "maxAgeInDays": 90})
            .as_object()
            .cloned()
            .unwrap();
        let mut pairs = query_pairs(&params);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("ipAddress".to_string(), "1.2.3.4".to_string()),
                ("maxAgeInDays".to_string(), "90".to_string()),
            ]
        );
    }
}
