use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use campus_types::routes::{LOGIN_PATH, RETURN_URL_PARAM, Role, landing_path_for};

/// Snapshot of the auth/session collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub is_loading: bool,
    pub is_authenticated: bool,
    pub user: Option<SessionUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub role: String,
}

impl SessionState {
    pub fn loading() -> Self {
        Self {
            is_loading: true,
            ..Self::default()
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(role: impl Into<String>) -> Self {
        Self {
            is_loading: false,
            is_authenticated: true,
            user: Some(SessionUser { role: role.into() }),
        }
    }

    fn role(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.role.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still resolving: show nothing, go nowhere.
    Pending,
    Render,
    Redirect(String),
}

/// Gate for one navigable region.
#[derive(Debug, Clone, Default)]
pub struct RouteGuard {
    /// Empty means any authenticated role. The first entry is the role the
    /// region belongs to.
    allowed_roles: Vec<Role>,
}

impl RouteGuard {
    pub fn any_authenticated() -> Self {
        Self::default()
    }

    pub fn allow(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut allowed_roles = Vec::new();
        for role in roles {
            if !allowed_roles.contains(&role) {
                allowed_roles.push(role);
            }
        }
        Self { allowed_roles }
    }

    /// Landing path of the role this region belongs to.
    pub fn region_landing_path(&self) -> Option<&'static str> {
        self.allowed_roles.first().map(|role| role.landing_path())
    }

    pub fn evaluate(&self, session: &SessionState, path: &str) -> GuardDecision {
        if session.is_loading {
            return GuardDecision::Pending;
        }
        if !session.is_authenticated {
            return GuardDecision::Redirect(login_redirect(path));
        }
        if self.allowed_roles.is_empty() {
            return GuardDecision::Render;
        }

        match session.role().and_then(|r| r.parse::<Role>().ok()) {
            Some(role) if self.allowed_roles.contains(&role) => GuardDecision::Render,
            // A recognised role outside the whitelist goes to the region's own
            // landing path; an unrecognised one has nowhere better than the fallback.
            Some(role) => {
                let target = self.region_landing_path().unwrap_or(role.landing_path());
                GuardDecision::Redirect(target.to_string())
            }
            None => GuardDecision::Redirect(landing_path_for(session.role()).to_string()),
        }
    }
}

/// Login entry point that returns the visitor to `path` afterwards.
pub fn login_redirect(path: &str) -> String {
    format!("{}?{}={}", LOGIN_PATH, RETURN_URL_PARAM, urlencoding::encode(path))
}

/// Re-evaluates a guard whenever the session or the current path changes,
/// so a role change or logout never leaves a stale grant in place.
pub struct GuardWatcher {
    guard: RouteGuard,
    session: watch::Receiver<SessionState>,
    path: watch::Receiver<String>,
}

impl GuardWatcher {
    pub fn new(guard: RouteGuard, session: watch::Receiver<SessionState>, path: watch::Receiver<String>) -> Self {
        Self { guard, session, path }
    }

    /// Decision for the latest session and path.
    pub fn current(&mut self) -> GuardDecision {
        let session = self.session.borrow_and_update().clone();
        let path = self.path.borrow_and_update().clone();
        self.guard.evaluate(&session, &path)
    }

    /// Wait for the next session or path change and return the new decision.
    /// `None` once either source has gone away.
    pub async fn changed(&mut self) -> Option<GuardDecision> {
        let result = tokio::select! {
            r = self.session.changed() => r,
            r = self.path.changed() => r,
        };
        result.ok()?;
        Some(self.current())
    }

    /// Drive the watcher on its own task, publishing every decision.
    pub fn spawn(mut self) -> watch::Receiver<GuardDecision> {
        let (tx, rx) = watch::channel(self.current());
        tokio::spawn(async move {
            while let Some(decision) = self.changed().await {
                debug!(?decision, "route guard re-evaluated");
                if tx.send(decision).is_err() {
                    break;
                }
            }
        });
        rx
    }
}
