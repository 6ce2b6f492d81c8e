use std::sync::Arc;

use fsapi_transport::{FsapiRequest, Transport};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::response::{FsapiResponse, ListItem, ListPage, Notifications, Status, WireValue};

/// Upper bound on pages fetched for one list, guarding against firmware that
/// never reports the end of a list.
pub const MAX_LIST_PAGES: usize = 256;

/// First index passed to `LIST_GET_NEXT`
///
/// Firmware revisions disagree on whether the index means "after this key"
/// (start at -1) or "starting at this key" (start at 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrigin {
    #[default]
    MinusOne,
    Zero,
}

impl ListOrigin {
    pub fn first_index(self) -> i64 {
        match self {
            ListOrigin::MinusOne => -1,
            ListOrigin::Zero => 0,
        }
    }
}

/// Per-client protocol options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub list_origin: ListOrigin,
    /// Sent as `maxItems` with every list request
    pub page_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            list_origin: ListOrigin::MinusOne,
            page_size: 100,
        }
    }
}

/// Stateless-per-call FSAPI client bound to one device
///
/// Holds the address, pin and the current session id. It never reconnects
/// on its own: every failure is returned to the caller, which is expected to
/// be a [`Connection`](crate::Connection).
pub struct FsapiClient {
    transport: Arc<dyn Transport>,
    address: String,
    pin: String,
    session: RwLock<Option<String>>,
    options: ClientOptions,
}

impl FsapiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        address: impl Into<String>,
        pin: impl Into<String>,
    ) -> Self {
        Self::with_options(transport, address, pin, ClientOptions::default())
    }

    pub fn with_options(
        transport: Arc<dyn Transport>,
        address: impl Into<String>,
        pin: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        Self {
            transport,
            address: address.into(),
            pin: pin.into(),
            session: RwLock::new(None),
            options,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The session id in use, if one has been established
    pub fn session_id(&self) -> Option<String> {
        self.session.read().clone()
    }

    /// Request a fresh session id and start using it
    pub async fn create_session(&self) -> Result<String> {
        // The pin alone authorizes CREATE_SESSION; a stale sid would be rejected.
        let request = FsapiRequest::new("CREATE_SESSION").with_param("pin", &self.pin);
        let response = self.send(&request).await?;

        if response.status() != &Status::Ok {
            return Err(ApiError::SessionRejected(format!(
                "CREATE_SESSION returned {}",
                response.status()
            )));
        }

        let sid = response
            .session_id()
            .ok_or_else(|| ApiError::SessionRejected("no sessionId in response".to_string()))?;

        debug!(address = %self.address, sid = %sid, "session established");
        *self.session.write() = Some(sid.clone());
        Ok(sid)
    }

    /// Read the first scalar value of `node`
    pub async fn get(&self, node: &str) -> Result<WireValue> {
        let request = self.authorized(format!("GET/{}", node));
        let response = self.send(&request).await?;

        match response.status() {
            Status::Ok => response
                .value()
                .ok_or_else(|| ApiError::MissingPayload(node.to_string())),
            status => Err(status_error(&request.path, node, status)),
        }
    }

    /// Write a wire-encoded value to `node`
    pub async fn set(&self, node: &str, value: &str) -> Result<()> {
        let request = self
            .authorized(format!("SET/{}", node))
            .with_param("value", value);
        let response = self.send(&request).await?;

        match response.status() {
            Status::Ok => Ok(()),
            status => Err(status_error(&request.path, node, status)),
        }
    }

    /// Fetch one page of `node` following index `after`
    pub async fn get_list_page(&self, node: &str, after: i64) -> Result<ListPage> {
        let request = self
            .authorized(format!("LIST_GET_NEXT/{}/{}", node, after))
            .with_param("maxItems", self.options.page_size.to_string());
        let response = self.send(&request).await?;

        match response.status() {
            Status::Ok | Status::ListEnd => Ok(ListPage {
                items: response.items(),
                end: response.has_list_end(),
            }),
            status => Err(status_error(&request.path, node, status)),
        }
    }

    /// Read a whole list, page by page, until the device reports its end
    ///
    /// Items are returned in page order. The index advances by the number of
    /// items received so single-item and multi-item pages behave the same.
    pub async fn get_list(&self, node: &str) -> Result<Vec<ListItem>> {
        let mut items = Vec::new();
        let mut after = self.options.list_origin.first_index();

        for _ in 0..MAX_LIST_PAGES {
            let page = self.get_list_page(node, after).await?;
            let received = page.items.len();
            items.extend(page.items);

            if page.end || received == 0 {
                return Ok(items);
            }
            after += received as i64;
        }

        warn!(node, pages = MAX_LIST_PAGES, "list did not end; truncating");
        Ok(items)
    }

    /// One long-poll for change notifications
    pub async fn get_notifications(&self) -> Result<Notifications> {
        let request = self.authorized("GET_NOTIFIES");
        let response = self.send(&request).await?;

        match response.status() {
            Status::Timeout => Ok(Notifications::Timeout),
            Status::Ok => Ok(Notifications::Changes(response.notifications())),
            status => Err(ApiError::Status {
                path: request.path,
                status: status.clone(),
            }),
        }
    }

    fn authorized(&self, path: impl Into<String>) -> FsapiRequest {
        let request = FsapiRequest::new(path).with_param("pin", &self.pin);
        match self.session.read().as_deref() {
            Some(sid) => request.with_param("sid", sid),
            None => request,
        }
    }

    async fn send(&self, request: &FsapiRequest) -> Result<FsapiResponse> {
        let root = self.transport.request(&self.address, request).await?;
        FsapiResponse::from_element(root)
    }
}

fn status_error(path: &str, node: &str, status: &Status) -> ApiError {
    match status {
        Status::NodeDoesNotExist | Status::NodeBlocked => ApiError::NodeUnavailable {
            node: node.to_string(),
            status: status.clone(),
        },
        other => ApiError::Status {
            path: path.to_string(),
            status: other.clone(),
        },
    }
}
