//! Route-keyed page data.
//!
//! [`DataFetcher`] maps a path (and an optional signed-in user) to the
//! [`PageData`] a page is rendered with. Lookups are bounded by
//! [`fetch_with_timeout`]; the renderer substitutes [`PageData::fallback`]
//! whenever that fails.

use crate::error::FetchError;
use crate::props::{PropValue, Props};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Identity of a signed-in user, as resolved by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user row as held by the user store, credentials included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl UserRecord {
    pub fn projection(&self) -> UserProjection {
        UserProjection {
            id: self.id.0,
            email: self.email.clone(),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            avatar: self.avatar.clone(),
            is_active: self.is_active,
            is_admin: self.is_admin,
            created_at: self.created_at.format(TIMESTAMP_FORMAT).to_string(),
            updated_at: self.updated_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Public view of a user. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProjection {
    pub id: u64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Source of user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, FetchError>;
}

/// In-memory user store, seeded from code or a JSON file.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of user records.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FetchError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Failed(format!("Cannot read {}: {}", path.display(), e)))?;
        let records: Vec<UserRecord> = serde_json::from_str(&raw)
            .map_err(|e| FetchError::Failed(format!("Invalid users file {}: {}", path.display(), e)))?;

        let users = records.into_iter().map(|user| (user.id, user)).collect();
        Ok(Self {
            users: RwLock::new(users),
        })
    }

    pub async fn insert(&self, user: UserRecord) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, FetchError> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

/// Page data handed to components and the document template.
///
/// Always holds `pageType`, `title`, `description`, `path` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageData(Props);

impl PageData {
    fn new(page_type: &str, title: &str, description: &str, path: &str) -> Self {
        let mut props = Props::new();
        props.insert("pageType".into(), page_type.into());
        props.insert("title".into(), title.into());
        props.insert("description".into(), description.into());
        props.insert("path".into(), path.into());
        props.insert("timestamp".into(), Utc::now().timestamp().into());
        Self(props)
    }

    /// Minimal data used when fetching failed or timed out.
    pub fn fallback(path: &str, title: &str, description: &str) -> Self {
        Self::new("unknown", title, description, path)
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.0.get(key)
    }

    pub fn page_type(&self) -> Option<&str> {
        self.get("pageType").and_then(PropValue::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title").and_then(PropValue::as_str)
    }

    pub fn has_user(&self) -> bool {
        self.0.contains_key("user")
    }

    pub fn as_props(&self) -> &Props {
        &self.0
    }

    pub fn into_props(self) -> Props {
        self.0
    }

    fn insert(&mut self, key: &str, value: PropValue) {
        self.0.insert(key.to_string(), value);
    }
}

/// One entry of the route table.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub path: &'static str,
    pub page_type: &'static str,
    pub component: &'static str,
    pub title: &'static str,
    pub description: &'static str,
}

pub const ROUTES: &[Route] = &[
    Route {
        path: "/",
        page_type: "home",
        component: "HomePage",
        title: "Rexo - 全栈 React 研发框架",
        description: "基于 Rust + React 的全栈研发框架，支持服务端渲染",
    },
    Route {
        path: "/about",
        page_type: "about",
        component: "AboutPage",
        title: "关于 Rexo",
        description: "了解 Rexo 框架的特性和优势",
    },
    Route {
        path: "/dashboard",
        page_type: "dashboard",
        component: "DashboardPage",
        title: "仪表板",
        description: "管理您的项目和应用程序",
    },
    Route {
        path: "/profile",
        page_type: "profile",
        component: "ProfilePage",
        title: "个人资料",
        description: "管理您的个人资料和设置",
    },
    Route {
        path: "/login",
        page_type: "login",
        component: "LoginPage",
        title: "登录",
        description: "登录您的 Rexo 账户",
    },
    Route {
        path: "/register",
        page_type: "register",
        component: "RegisterPage",
        title: "注册",
        description: "创建新的 Rexo 账户",
    },
];

/// Served for any path not in [`ROUTES`].
pub static FALLBACK_ROUTE: Route = Route {
    path: "",
    page_type: "unknown",
    component: "NotFoundPage",
    title: "Rexo",
    description: "基于 Rust + React 的全栈研发框架",
};

/// Route table entry for `path`, or the fallback.
pub fn route_for(path: &str) -> &'static Route {
    ROUTES
        .iter()
        .find(|route| route.path == path)
        .unwrap_or(&FALLBACK_ROUTE)
}

/// Component rendering `path`.
pub fn component_for(path: &str) -> &'static str {
    route_for(path).component
}

/// Data layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Deadline for assembling page data
    pub fetch_timeout_ms: u64,
    /// JSON file with user records for the in-memory store
    pub users_file: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 3_000,
            users_file: None,
        }
    }
}

/// Race `fetch` against `timeout`. Either the whole result arrives in time
/// or the caller gets [`FetchError::Timeout`] and `fetch` is dropped.
pub async fn fetch_with_timeout<T, F>(timeout: Duration, fetch: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    tokio::time::timeout(timeout, fetch)
        .await
        .map_err(|_| FetchError::Timeout(timeout))?
}

/// Builds page data from the route table and the user store.
#[derive(Clone)]
pub struct DataFetcher {
    users: Arc<dyn UserStore>,
}

impl DataFetcher {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    pub async fn fetch_user_data(&self, id: UserId) -> Result<UserProjection, FetchError> {
        self.users
            .find_user(id)
            .await?
            .map(|user| user.projection())
            .ok_or(FetchError::NotFound(id.0))
    }

    /// Page data for `path`. Unknown paths get the fallback entry; an
    /// identity that cannot be resolved is treated as anonymous.
    pub async fn fetch_page_data(
        &self,
        path: &str,
        user: Option<UserId>,
    ) -> Result<PageData, FetchError> {
        let route = route_for(path);
        let mut data = PageData::new(route.page_type, route.title, route.description, path);

        let Some(id) = user else {
            return Ok(data);
        };

        let projection = match self.fetch_user_data(id).await {
            Ok(projection) => projection,
            Err(FetchError::NotFound(_)) => {
                tracing::debug!(user = %id, "unknown user, rendering anonymously");
                return Ok(data);
            }
            Err(e) => {
                tracing::warn!(user = %id, error = %e, "user lookup failed, rendering anonymously");
                return Ok(data);
            }
        };

        let user_prop = PropValue::from_serializable(&projection)
            .map_err(|e| FetchError::Failed(e.to_string()))?;
        data.insert("user", user_prop);

        if route.page_type == "dashboard" {
            let mut stats = Props::new();
            stats.insert("totalProjects".into(), 5i64.into());
            stats.insert("activeTasks".into(), 12i64.into());
            stats.insert("completedTasks".into(), 8i64.into());
            data.insert("stats", stats.into());
        }

        Ok(data)
    }
}
