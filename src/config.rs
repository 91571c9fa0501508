use crate::info;
use serde::{Deserialize, Serialize};
use tokio::fs;

/// 网关配置：启动时读取一次，运行期间只读
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// 监听地址，例如 "127.0.0.1:3001"（端口填 0 则由系统分配）
    #[serde(default = "default_listen")]
    pub listen: String,

    /// 鉴权 Token。设置后客户端必须携带相同的 Token 才能连接
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// 绑定机器人账号。设置后只允许该身份接入，其余一律拒绝
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,

    /// 群/用户过滤策略
    #[serde(default)]
    pub filter: FilterPolicy,
}

fn default_listen() -> String {
    "127.0.0.1:3001".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            access_token: None,
            bot_id: None,
            filter: FilterPolicy::default(),
        }
    }
}

impl AppConfig {
    /// 读取配置文件；文件不存在时生成默认配置并落盘
    pub async fn load(path: &str) -> anyhow::Result<Self> {
        if fs::try_exists(path).await? {
            let text = fs::read_to_string(path).await?;
            Ok(toml::from_str(&text)?)
        } else {
            let config = Self::default();
            config.save(path).await?;
            info!(target: "System", "已生成默认配置文件: {}", path);
            Ok(config)
        }
    }

    pub async fn save(&self, path: &str) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).await?;
        Ok(())
    }
}

/// 过滤策略：决定一条消息是否转发给处理器
/// 拒绝名单的优先级永远高于允许名单
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FilterPolicy {
    /// 是否响应所有群聊。关闭后仅响应 group_allow 中的群
    #[serde(default = "default_true")]
    pub respond_all_groups: bool,

    #[serde(default)]
    pub group_allow: Vec<i64>,

    #[serde(default)]
    pub group_deny: Vec<i64>,

    /// 私聊白名单。非空时只响应名单内的用户
    #[serde(default)]
    pub user_allow: Vec<i64>,

    #[serde(default)]
    pub user_deny: Vec<i64>,
}

fn default_true() -> bool {
    true
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            respond_all_groups: true,
            group_allow: Vec::new(),
            group_deny: Vec::new(),
            user_allow: Vec::new(),
            user_deny: Vec::new(),
        }
    }
}

impl FilterPolicy {
    /// 群消息是否放行
    pub fn allows_group(&self, group_id: i64, user_id: i64) -> bool {
        if self.group_deny.contains(&group_id) || self.user_deny.contains(&user_id) {
            return false;
        }
        self.respond_all_groups || self.group_allow.contains(&group_id)
    }

    /// 私聊消息是否放行
    pub fn allows_private(&self, user_id: i64) -> bool {
        if self.user_deny.contains(&user_id) {
            return false;
        }
        self.user_allow.is_empty() || self.user_allow.contains(&user_id)
    }
}
