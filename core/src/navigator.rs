use crate::api::ApiEvent;
use crate::guard::{GuardDecision, Route, RouteGuard};
use crate::session::SessionStore;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

/// Top-level controller: owns the current route, guards every navigation and
/// reacts to session teardown reported by the API client.
pub struct Navigator {
    current: Route,
    guard: RouteGuard,
    session: SessionStore,
    api_events: UnboundedReceiver<ApiEvent>,
}

impl Navigator {
    pub fn new(session: SessionStore, api_events: UnboundedReceiver<ApiEvent>) -> Self {
        Self {
            current: Route::Root,
            guard: RouteGuard::new(session.clone()),
            session,
            api_events,
        }
    }

    pub fn current(&self) -> &Route {
        &self.current
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Navigates to `destination`, returning the route actually reached.
    pub fn navigate(&mut self, destination: Route) -> &Route {
        self.process_events();
        let destination = destination.redirect().unwrap_or(destination);
        let decision = self.guard.check(&destination);
        debug!(%destination, ?decision, "navigation guarded");
        self.current = match decision {
            GuardDecision::Proceed | GuardDecision::Synchronized => destination,
            GuardDecision::Redirect(target) => target,
        };
        &self.current
    }

    pub fn navigate_path(&mut self, path: &str) -> Option<&Route> {
        let route = Route::parse(path)?;
        Some(self.navigate(route))
    }

    /// Applies pending API events. Returns `true` when the session was torn
    /// down and the navigator moved to the login route.
    pub fn process_events(&mut self) -> bool {
        let mut torn_down = false;
        while let Ok(event) = self.api_events.try_recv() {
            match event {
                ApiEvent::Unauthorized => {
                    self.session.logout();
                    self.current = Route::Login;
                    torn_down = true;
                }
            }
        }
        if torn_down {
            info!("session expired; redirected to login");
        }
        torn_down
    }
}
