// 云端同步权限管理
//
// 三层权限架构：
// 1. Normal：只使用本地存储
// 2. Certificate：本地存储 + 云端同步
// 3. Admin：本地存储 + 云端同步 + 管理 Certificate 用户

use serde::{Deserialize, Serialize};

const ADMIN_EMAIL_ENV: &str = "TRACKER_ADMIN_EMAIL";
const CERTIFICATE_EMAILS_ENV: &str = "TRACKER_CERTIFICATE_EMAILS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Normal,
    Certificate,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermissions {
    pub role: UserRole,
    pub can_sync_to_cloud: bool,
    pub can_read_from_cloud: bool,
    pub can_manage_certificates: bool,
}

/// 授权邮箱清单，通常从环境变量读取
#[derive(Debug, Clone, Default)]
pub struct AuthorizedEmails {
    pub admin: String,
    pub certificates: Vec<String>,
}

impl AuthorizedEmails {
    /// 从环境变量读取授权的 emails
    pub fn from_env() -> Self {
        let admin = std::env::var(ADMIN_EMAIL_ENV).unwrap_or_default();
        let certificates = std::env::var(CERTIFICATE_EMAILS_ENV)
            .unwrap_or_default()
            .split(',')
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
            .collect();

        Self { admin, certificates }
    }

    pub fn is_admin(&self, email: Option<&str>) -> bool {
        match email {
            Some(email) => !self.admin.is_empty() && email == self.admin,
            None => false,
        }
    }

    pub fn has_certificate(&self, email: Option<&str>) -> bool {
        match email {
            Some(email) => self.certificates.iter().any(|c| c == email),
            None => false,
        }
    }

    /// 根据用户 email 判断角色
    pub fn role_for(&self, email: Option<&str>) -> UserRole {
        if self.is_admin(email) {
            UserRole::Admin
        } else if self.has_certificate(email) {
            UserRole::Certificate
        } else {
            UserRole::Normal
        }
    }

    /// 取得用户完整权限
    pub fn permissions_for(&self, email: Option<&str>) -> UserPermissions {
        let role = self.role_for(email);
        let can_sync = matches!(role, UserRole::Admin | UserRole::Certificate);

        UserPermissions {
            role,
            can_sync_to_cloud: can_sync,
            can_read_from_cloud: can_sync,
            can_manage_certificates: role == UserRole::Admin,
        }
    }
}

/// 当前会话的用户身份，贯穿整个同步流程
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub email: Option<String>,
    pub permissions: UserPermissions,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, email: Option<String>, auth: &AuthorizedEmails) -> Self {
        let permissions = auth.permissions_for(email.as_deref());
        Self {
            user_id: user_id.into(),
            email,
            permissions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthorizedEmails {
        AuthorizedEmails {
            admin: "admin@example.com".to_string(),
            certificates: vec![
                "alice@example.com".to_string(),
                "bob@example.com".to_string(),
            ],
        }
    }

    #[test]
    fn test_role_resolution() {
        let auth = auth();
        assert_eq!(auth.role_for(Some("admin@example.com")), UserRole::Admin);
        assert_eq!(
            auth.role_for(Some("alice@example.com")),
            UserRole::Certificate
        );
        assert_eq!(auth.role_for(Some("nobody@example.com")), UserRole::Normal);
        assert_eq!(auth.role_for(None), UserRole::Normal);
    }

    #[test]
    fn test_normal_user_has_no_cloud_access() {
        let perms = auth().permissions_for(Some("nobody@example.com"));
        assert_eq!(perms.role, UserRole::Normal);
        assert!(!perms.can_sync_to_cloud);
        assert!(!perms.can_read_from_cloud);
        assert!(!perms.can_manage_certificates);
    }

    #[test]
    fn test_admin_permissions() {
        let perms = auth().permissions_for(Some("admin@example.com"));
        assert!(perms.can_sync_to_cloud);
        assert!(perms.can_read_from_cloud);
        assert!(perms.can_manage_certificates);
    }

    #[test]
    fn test_empty_admin_env_matches_nobody() {
        let auth = AuthorizedEmails::default();
        assert!(!auth.is_admin(Some("")));
        assert_eq!(auth.role_for(Some("")), UserRole::Normal);
    }
}
