//! 内置集成的静态描述
//!
//! 每个集成由一份 `IntegrationProfile` 描述：展示信息、凭据要求、上游地址、
//! 认证方式、连通性探测路径以及对外宣告的操作。

use crate::modules::{HttpMethod, ModuleCapability};

/// 上游认证方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// 以指定请求头携带 `api_key`
    Header(&'static str),
    /// `Authorization: Bearer <api_key>`
    Bearer,
    /// 以指定查询参数携带 `api_key`
    QueryParam(&'static str),
}

/// 单个操作：对外路由 + 上游请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// 对外路由模板
    pub route: &'static str,
    /// 对外路由动词
    pub method: HttpMethod,
    /// 上游请求动词
    pub upstream_method: HttpMethod,
    /// 上游路径模板，`{key}` 从调用参数或模块配置中取值
    pub upstream_path: &'static str,
    /// 调用参数到上游参数名的映射：（路由参数，上游参数）
    pub renames: &'static [(&'static str, &'static str)],
}

impl OperationSpec {
    const fn renaming(mut self, renames: &'static [(&'static str, &'static str)]) -> Self {
        self.renames = renames;
        self
    }

    /// 上游使用的参数名
    pub fn upstream_param<'a>(&self, name: &'a str) -> &'a str {
        self.renames
            .iter()
            .find(|(from, _)| *from == name)
            .map_or(name, |(_, to)| *to)
    }
}

const fn op(
    name: &'static str,
    description: &'static str,
    route: &'static str,
    method: HttpMethod,
    upstream_method: HttpMethod,
    upstream_path: &'static str,
) -> OperationSpec {
    OperationSpec {
        name,
        description,
        route,
        method,
        upstream_method,
        upstream_path,
        renames: &[],
    }
}

/// 集成描述
#[derive(Debug, Clone, Copy)]
pub struct IntegrationProfile {
    /// 模块标识
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub version: (u64, u64, u64),
    pub capabilities: &'static [ModuleCapability],
    /// 必须存在且非空的配置项
    pub required_keys: &'static [&'static str],
    /// 默认上游地址
    pub base_url: &'static str,
    /// 覆盖上游地址的配置项
    pub base_url_key: &'static str,
    pub auth: AuthScheme,
    /// 连通性探测路径（GET）
    pub probe_path: &'static str,
    /// 初始化时是否执行探测
    pub probe_on_init: bool,
    /// 健康报告中附带的配置项：（报告字段，配置项）
    pub probe_details: &'static [(&'static str, &'static str)],
    pub operations: &'static [OperationSpec],
}

impl IntegrationProfile {
    pub fn operation(&self, name: &str) -> Option<&'static OperationSpec> {
        self.operations.iter().find(|entry| entry.name == name)
    }

    pub fn requires_api_key(&self) -> bool {
        self.required_keys.contains(&"api_key")
    }
}

use HttpMethod::{Delete, Get, Patch, Post};

pub static VIRUSTOTAL: IntegrationProfile = IntegrationProfile {
    id: "virustotal",
    display_name: "VirusTotal",
    description: "Threat intelligence for files, URLs, IPs, and domains",
    version: (1, 0, 0),
    capabilities: &[ModuleCapability::ThreatIntelligence, ModuleCapability::Reputation],
    required_keys: &["api_key"],
    base_url: "https://www.virustotal.com/api/v3",
    base_url_key: "base_url",
    auth: AuthScheme::Header("x-apikey"),
    probe_path: "/users/current",
    probe_on_init: true,
    probe_details: &[],
    operations: &[
        op("analyze_file_hash", "Analyze a file by hash", "/api/v1/virustotal/files/{hash}", Get, Get, "/files/{hash}"),
        op("scan_url", "Submit a URL for scanning", "/api/v1/virustotal/urls", Post, Post, "/urls"),
        op("analyze_ip", "Get IP address report", "/api/v1/virustotal/ip/{ip}", Get, Get, "/ip_addresses/{ip}"),
        op("analyze_domain", "Get domain report", "/api/v1/virustotal/domains/{domain}", Get, Get, "/domains/{domain}"),
        op("search", "Search VirusTotal intelligence", "/api/v1/virustotal/search", Post, Get, "/intelligence/search"),
    ],
};

pub static ABUSEIPDB: IntegrationProfile = IntegrationProfile {
    id: "abuseipdb",
    display_name: "AbuseIPDB",
    description: "IP reputation checking and abuse reporting",
    version: (1, 0, 0),
    capabilities: &[ModuleCapability::Reputation, ModuleCapability::ThreatIntelligence],
    required_keys: &["api_key"],
    base_url: "https://api.abuseipdb.com/api/v2",
    base_url_key: "base_url",
    auth: AuthScheme::Header("Key"),
    probe_path: "/check?ipAddress=8.8.8.8",
    probe_on_init: true,
    probe_details: &[],
    operations: &[
        op("check_ip", "Check IP address reputation", "/api/v1/abuseipdb/check/{ip}", Get, Get, "/check")
            .renaming(&[("ip", "ipAddress")]),
        op("report_ip", "Report an abusive IP address", "/api/v1/abuseipdb/report", Post, Post, "/report"),
        op("get_blacklist", "Get blacklisted IP addresses", "/api/v1/abuseipdb/blacklist", Get, Get, "/blacklist"),
    ],
};

pub static SHODAN: IntegrationProfile = IntegrationProfile {
    id: "shodan",
    display_name: "Shodan",
    description: "Internet-wide asset discovery and vulnerability scanning",
    version: (1, 0, 0),
    capabilities: &[ModuleCapability::NetworkAnalysis, ModuleCapability::ThreatIntelligence],
    required_keys: &["api_key"],
    base_url: "https://api.shodan.io",
    base_url_key: "base_url",
    auth: AuthScheme::QueryParam("key"),
    probe_path: "/api-info",
    probe_on_init: true,
    probe_details: &[],
    operations: &[
        op("host_lookup", "Get host information", "/api/v1/shodan/host/{ip}", Get, Get, "/shodan/host/{ip}"),
        op("search", "Search Shodan", "/api/v1/shodan/search", Post, Get, "/shodan/host/search"),
        op("dns_lookup", "Resolve hostnames", "/api/v1/shodan/dns/{hostname}", Get, Get, "/dns/resolve"),
        op("exploit_search", "Search for exploits", "/api/v1/shodan/exploits/search", Post, Get, "/exploits/search"),
    ],
};

pub static URLSCAN: IntegrationProfile = IntegrationProfile {
    id: "urlscan",
    display_name: "URLScan.io",
    description: "URL analysis and phishing detection",
    version: (1, 0, 0),
    capabilities: &[ModuleCapability::ThreatIntelligence, ModuleCapability::NetworkAnalysis],
    required_keys: &["api_key"],
    base_url: "https://urlscan.io/api/v1",
    base_url_key: "base_url",
    auth: AuthScheme::Header("API-Key"),
    probe_path: "/search/?q=domain:google.com&size=1",
    probe_on_init: false,
    probe_details: &[],
    operations: &[
        op("submit_url", "Submit a URL for scanning", "/api/v1/urlscan/scan", Post, Post, "/scan/"),
        op("get_result", "Get scan result", "/api/v1/urlscan/result/{uuid}", Get, Get, "/result/{uuid}/"),
        op("search", "Search historical scans", "/api/v1/urlscan/search", Post, Get, "/search/"),
    ],
};

pub static LIMACHARLIE: IntegrationProfile = IntegrationProfile {
    id: "limacharlie",
    display_name: "LimaCharlie",
    description: "Full EDR and telemetry management with detection and response capabilities",
    version: (1, 0, 0),
    capabilities: &[
        ModuleCapability::Edr,
        ModuleCapability::Forensics,
        ModuleCapability::Automation,
    ],
    required_keys: &["api_key", "organization_id"],
    base_url: "https://api.limacharlie.io",
    base_url_key: "base_url",
    auth: AuthScheme::Bearer,
    probe_path: "/v1/orgs",
    probe_on_init: true,
    probe_details: &[("organization", "organization_id")],
    operations: &[
        op("list_sensors", "List all sensors", "/api/v1/limacharlie/sensors", Get, Get, "/v1/{organization_id}/sensors"),
        op("get_sensor", "Get sensor details", "/api/v1/limacharlie/sensors/{sensor_id}", Get, Get, "/v1/{organization_id}/sensors/{sensor_id}"),
        op("isolate_sensor", "Isolate a sensor from the network", "/api/v1/limacharlie/sensors/{sensor_id}/isolate", Post, Post, "/v1/{organization_id}/sensors/{sensor_id}/isolation"),
        op("rejoin_sensor", "Rejoin an isolated sensor to the network", "/api/v1/limacharlie/sensors/{sensor_id}/rejoin", Post, Delete, "/v1/{organization_id}/sensors/{sensor_id}/isolation"),
        op("query_events", "Query telemetry events", "/api/v1/limacharlie/events/query", Post, Post, "/v1/{organization_id}/events"),
        op("list_detections", "List detections", "/api/v1/limacharlie/detections", Get, Get, "/v1/{organization_id}/detections"),
        op("scan_ioc", "Scan for an indicator of compromise", "/api/v1/limacharlie/ioc/scan", Post, Post, "/v1/{organization_id}/ioc/scan"),
        op("run_command", "Run a command on a sensor", "/api/v1/limacharlie/sensors/{sensor_id}/command", Post, Post, "/v1/{organization_id}/sensors/{sensor_id}/task"),
        op("list_processes", "List processes on a sensor", "/api/v1/limacharlie/sensors/{sensor_id}/processes", Get, Post, "/v1/{organization_id}/sensors/{sensor_id}/task"),
        op("kill_process", "Kill a process on a sensor", "/api/v1/limacharlie/sensors/{sensor_id}/processes/{pid}/kill", Post, Post, "/v1/{organization_id}/sensors/{sensor_id}/task"),
    ],
};

pub static THEHIVE: IntegrationProfile = IntegrationProfile {
    id: "thehive",
    display_name: "TheHive",
    description: "Full incident management and case handling integration with TheHive",
    version: (1, 0, 0),
    capabilities: &[ModuleCapability::IncidentManagement, ModuleCapability::Automation],
    required_keys: &["api_key", "api_url"],
    base_url: "http://localhost:9000",
    base_url_key: "api_url",
    auth: AuthScheme::Bearer,
    probe_path: "/api/user/current",
    probe_on_init: true,
    probe_details: &[("endpoint", "api_url")],
    operations: &[
        op("list_cases", "List cases", "/api/v1/thehive/cases", Get, Get, "/api/case"),
        op("get_case", "Get case details", "/api/v1/thehive/cases/{case_id}", Get, Get, "/api/case/{case_id}"),
        op("create_case", "Create a new case", "/api/v1/thehive/cases", Post, Post, "/api/case"),
        op("update_case", "Update a case", "/api/v1/thehive/cases/{case_id}", HttpMethod::Put, Patch, "/api/case/{case_id}"),
        op("close_case", "Close a case", "/api/v1/thehive/cases/{case_id}/close", Post, Patch, "/api/case/{case_id}"),
        op("list_alerts", "List alerts", "/api/v1/thehive/alerts", Get, Get, "/api/alert"),
        op("promote_alert", "Promote an alert to a case", "/api/v1/thehive/alerts/{alert_id}/promote", Post, Post, "/api/alert/{alert_id}/createCase"),
        op("add_observable", "Add an observable to a case", "/api/v1/thehive/cases/{case_id}/observables", Post, Post, "/api/case/{case_id}/artifact"),
        op("create_task", "Create a task in a case", "/api/v1/thehive/cases/{case_id}/tasks", Post, Post, "/api/case/{case_id}/task"),
        op("search_cases", "Search cases", "/api/v1/thehive/cases/search", Post, Post, "/api/case/_search"),
    ],
};

/// 所有内置集成
pub static BUILTIN_PROFILES: [&IntegrationProfile; 6] =
    [&VIRUSTOTAL, &ABUSEIPDB, &SHODAN, &URLSCAN, &LIMACHARLIE, &THEHIVE];

/// 按标识查找内置集成
pub fn builtin_profile(id: &str) -> Option<&'static IntegrationProfile> {
    BUILTIN_PROFILES.iter().copied().find(|profile| profile.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_profiles_are_well_formed() {
        let mut ids = HashSet::new();
        for profile in BUILTIN_PROFILES {
            assert!(ids.insert(profile.id), "duplicate id {}", profile.id);
            assert!(!profile.operations.is_empty());
            assert!(profile.probe_path.starts_with('/'));

            let mut names = HashSet::new();
            for entry in profile.operations {
                assert!(names.insert(entry.name), "duplicate op {} in {}", entry.name, profile.id);
                assert!(entry.route.starts_with(&format!("/api/v1/{}/", profile.id)));
                assert!(entry.upstream_path.starts_with('/'));
            }
        }
    }

    #[test]
    fn test_builtin_lookup() {
        let profile = builtin_profile("thehive").unwrap();
        assert_eq!(profile.base_url_key, "api_url");
        assert_eq!(profile.operation("close_case").unwrap().method, HttpMethod::Post);
        assert!(profile.operation("delete_everything").is_none());
        assert!(builtin_profile("splunk").is_none());

        assert!(builtin_profile("limacharlie").unwrap().requires_api_key());
    }

    #[test]
    fn test_route_params_reach_upstream() {
        let check_ip = ABUSEIPDB.operation("check_ip").unwrap();
        assert_eq!(check_ip.upstream_param("ip"), "ipAddress");
        assert_eq!(check_ip.upstream_param("maxAgeInDays"), "maxAgeInDays");

        let analyze_ip = VIRUSTOTAL.operation("analyze_ip").unwrap();
        assert_eq!(analyze_ip.upstream_param("ip"), "ip");
    }
}
