//
// Session lifecycle: resume or create, cookie and CSRF issuance, silent renew
//
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use cookie::Cookie;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::{
    config::{ClientConfig, ClientStorage, CookieOptions},
    crypto,
    error::Result,
    store::{SessionData, SessionStore},
    token::Token,
    util,
};

pub const CSRF_COOKIE_NAME: &str = "csrf_token";
const CSRF_COOKIE_MAX_AGE: i64 = 3600;

/// Request side of the embedding framework: cookie and header access plus a
/// slot to hand the established session to downstream handlers.
pub trait SessionRequest: Send + Sync {
    fn header(&self, name: &str) -> Option<String>;

    fn cookie(&self, name: &str) -> Option<String> {
        self.header("cookie").and_then(|header| util::cookie_value(&header, name))
    }

    fn attach_session(&self, data: &SessionData) {
        let _ = data;
    }
}

/// Response side of the embedding framework.
pub trait SessionResponse: Send + Sync {
    fn add_cookie(&mut self, cookie: Cookie<'static>);
    fn write_json(&mut self, body: Value);
}

pub struct SessionContext<'a> {
    pub request: &'a dyn SessionRequest,
    pub response: &'a mut dyn SessionResponse,
}

/// One user session. Owns at most one `sid` and one pending renew timer.
pub struct Session {
    config: Arc<ClientConfig>,
    token: Arc<Token>,
    store: Arc<dyn SessionStore>,
    // Shared with the renew task so a failed refresh can tear down the session
    sid: Arc<StdMutex<Option<String>>>,
    renew_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(config: Arc<ClientConfig>, token: Arc<Token>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            token,
            store,
            sid: Arc::new(StdMutex::new(None)),
            renew_task: StdMutex::new(None),
        }
    }

    pub fn sid(&self) -> Option<String> {
        self.sid.lock().expect("sid slot poisoned").clone()
    }

    //
    // Lifecycle
    //

    /// Resume the session named by the request cookie, or establish a new
    /// one from the currently held tokens.
    pub async fn start(&self, ctx: &mut SessionContext<'_>) -> Result<()> {
        let mode = self.config.session.mode;

        if mode.server_side() {
            self.start_server_side(ctx).await?;
        }
        if mode.client_side() {
            self.emit_client_tokens(ctx, !mode.server_side()).await?;
        }
        Ok(())
    }

    async fn start_server_side(&self, ctx: &mut SessionContext<'_>) -> Result<()> {
        let cookie_name = self.config.session.cookie.name.clone();

        if let Some(cookie_sid) = ctx.request.cookie(&cookie_name) {
            // Re-entrant start on the already active session is a no-op
            if self.sid().as_deref() == Some(cookie_sid.as_str()) {
                return Ok(());
            }

            match self.store.get(&cookie_sid).await {
                Ok(Some(data)) => {
                    debug!("Resuming session {cookie_sid}");
                    *self.sid.lock().expect("sid slot poisoned") = Some(cookie_sid);
                    self.token.restore_tokens(data.tokens.clone());
                    self.schedule_renew(data.tokens.expires_in);
                    ctx.request.attach_session(&data);
                    return Ok(());
                }
                Ok(None) => {
                    debug!("Session cookie {cookie_sid} is stale, clearing it");
                    let mut stale = build_cookie(&cookie_name, "", &self.config.session.cookie, None);
                    stale.make_removal();
                    ctx.response.add_cookie(stale);
                }
                Err(e) => warn!("Session store lookup failed, creating a new session: {e}"),
            }
        }

        self.create_session(ctx).await
    }

    async fn create_session(&self, ctx: &mut SessionContext<'_>) -> Result<()> {
        let tokens = match self.token.get_tokens() {
            Some(tokens) => tokens,
            None => err!(NoTokens, "Cannot establish a session without tokens"),
        };

        // Userinfo is a nice-to-have on the session, never a blocker
        let user = match self.token.user_info(&tokens.access_token).await {
            Ok(user) => Some(user),
            Err(e) => {
                debug!("Could not fetch userinfo for the new session: {e}");
                None
            }
        };

        let csrf_token = crypto::csrf_token();
        let mut data = SessionData::new(tokens.clone());
        data.user = user;
        data.csrf_token = Some(csrf_token.clone());

        let sid = self.store.set(data.clone()).await?;
        debug!("Established session {sid}");
        *self.sid.lock().expect("sid slot poisoned") = Some(sid.clone());

        ctx.response.add_cookie(build_cookie(
            &self.config.session.cookie.name,
            &sid,
            &self.config.session.cookie,
            Some(self.config.session.ttl as i64),
        ));

        let mut csrf_cookie =
            build_cookie(CSRF_COOKIE_NAME, &csrf_token, &self.config.session.cookie, Some(CSRF_COOKIE_MAX_AGE));
        // The frontend has to read this one to echo it back
        csrf_cookie.set_http_only(false);
        ctx.response.add_cookie(csrf_cookie);

        self.schedule_renew(tokens.expires_in);
        ctx.request.attach_session(&data);
        Ok(())
    }

    /// Ship the tokens to the browser: individual cookies, or a JSON body
    /// for local-storage clients.
    async fn emit_client_tokens(&self, ctx: &mut SessionContext<'_>, attach: bool) -> Result<()> {
        let tokens = match self.token.get_tokens() {
            Some(tokens) => tokens,
            None => err!(NoTokens, "Cannot hand off tokens without tokens"),
        };

        match self.config.session.client_storage {
            ClientStorage::Cookie => {
                let options = &self.config.session.cookie;
                let max_age = tokens.expires_in;
                ctx.response.add_cookie(build_cookie("access_token", &tokens.access_token, options, max_age));
                if let Some(id_token) = &tokens.id_token {
                    ctx.response.add_cookie(build_cookie("id_token", id_token, options, max_age));
                }
                if let Some(refresh_token) = &tokens.refresh_token {
                    ctx.response.add_cookie(build_cookie("refresh_token", refresh_token, options, max_age));
                }
            }
            ClientStorage::LocalStorage => {
                ctx.response.write_json(json!({
                    "access_token": tokens.access_token,
                    "id_token": tokens.id_token,
                    "refresh_token": tokens.refresh_token,
                    "token_type": tokens.token_type,
                    "expires_in": tokens.expires_in,
                }));
            }
        }

        if attach {
            let mut data = SessionData::new(tokens.clone());
            data.user = self.token.user_info(&tokens.access_token).await.ok();
            ctx.request.attach_session(&data);
        }
        Ok(())
    }

    /// Re-apply the currently held token set to the stored session and
    /// reschedule the renew timer.
    pub async fn update(&self) -> Result<()> {
        let tokens = match self.token.get_tokens() {
            Some(tokens) => tokens,
            None => err!(NoTokens, "Cannot update a session without tokens"),
        };

        if let Some(sid) = self.sid() {
            match self.store.get(&sid).await? {
                Some(mut data) => {
                    data.tokens = tokens.clone();
                    if let Ok(user) = self.token.user_info(&tokens.access_token).await {
                        data.user = Some(user);
                    }
                    self.store.touch(&sid, data).await?;
                }
                None => err!(SessionError, format!("Session {sid} disappeared from the store")),
            }
        }

        self.schedule_renew(tokens.expires_in);
        Ok(())
    }

    /// Cancel the renew timer and drop the server-side session.
    pub async fn stop(&self) -> Result<()> {
        self.cancel_renew();
        let sid = self.sid.lock().expect("sid slot poisoned").take();
        if let Some(sid) = sid {
            debug!("Destroying session {sid}");
            self.store.destroy(&sid).await?;
        }
        Ok(())
    }

    //
    // Silent renew
    //

    fn schedule_renew(&self, expires_in: Option<i64>) {
        if !self.config.session.use_silent_renew {
            return;
        }
        let Some(expires_in) = expires_in else {
            // Nothing to go on; the token never reports expiry
            return;
        };

        self.cancel_renew();

        let token = Arc::clone(&self.token);
        let store = Arc::clone(&self.store);
        let sid = Arc::clone(&self.sid);
        let threshold = self.config.token_refresh_threshold as i64;
        let initial_delay = renew_delay(expires_in, threshold);

        let handle = tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::time::sleep(delay).await;

                match token.refresh_access_token().await {
                    Ok(set) => {
                        let current_sid = sid.lock().expect("sid slot poisoned").clone();
                        if let Some(current_sid) = current_sid {
                            if let Ok(Some(mut data)) = store.get(&current_sid).await {
                                data.tokens = set.clone();
                                if let Ok(user) = token.user_info(&set.access_token).await {
                                    data.user = Some(user);
                                }
                                if let Err(e) = store.touch(&current_sid, data).await {
                                    warn!("Failed to touch session {current_sid} after renew: {e}");
                                }
                            }
                        }

                        match set.expires_in {
                            Some(expires_in) => delay = renew_delay(expires_in, threshold),
                            None => break,
                        }
                    }
                    Err(e) => {
                        error!("Silent token refresh failed, stopping the session: {e}");
                        let old = sid.lock().expect("sid slot poisoned").take();
                        if let Some(old) = old {
                            if let Err(e) = store.destroy(&old).await {
                                warn!("Failed to destroy session {old}: {e}");
                            }
                        }
                        break;
                    }
                }
            }
        });

        *self.renew_task.lock().expect("renew slot poisoned") = Some(handle);
    }

    fn cancel_renew(&self) {
        if let Some(handle) = self.renew_task.lock().expect("renew slot poisoned").take() {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_renew();
    }
}

fn renew_delay(expires_in: i64, threshold_secs: i64) -> Duration {
    let millis = expires_in * 1000 - threshold_secs * 1000;
    if millis <= 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(millis as u64)
    }
}

pub(crate) fn build_cookie(
    name: &str,
    value: &str,
    options: &CookieOptions,
    max_age_secs: Option<i64>,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), value.to_string());
    cookie.set_http_only(options.http_only);
    cookie.set_secure(options.secure);
    cookie.set_same_site(cookie::SameSite::from(options.same_site));
    cookie.set_path(options.path.clone());
    if let Some(domain) = &options.domain {
        cookie.set_domain(domain.clone());
    }
    if let Some(secs) = max_age_secs {
        cookie.set_max_age(cookie::time::Duration::seconds(secs));
    }
    cookie
}
