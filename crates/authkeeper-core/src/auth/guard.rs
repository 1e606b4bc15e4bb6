use crate::config::AuthConfig;

/// Navigation the host should perform instead of showing the requested route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
}

/// Route-level access rule: anonymous users are sent to the login route,
/// and optionally signed-in users are sent away from it.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_route: String,
    home_route: String,
    hide_login_when_authenticated: bool,
}

impl RouteGuard {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            login_route: config.login_route.clone(),
            home_route: config.home_route.clone(),
            hide_login_when_authenticated: config.hide_login_when_authenticated,
        }
    }

    pub fn check(&self, path: &str, authenticated: bool) -> Option<Redirect> {
        let on_login = path == self.login_route;
        if self.hide_login_when_authenticated && on_login && authenticated {
            return Some(Redirect {
                path: self.home_route.clone(),
            });
        }
        if !authenticated && !on_login {
            return Some(Redirect {
                path: self.login_route.clone(),
            });
        }
        None
    }
}
