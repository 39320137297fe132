//! Engine facade.
//!
//! [`StbController::spawn`] starts a worker task that owns the device session
//! and the channel catalog. Every operation is a request on one command
//! queue, so a catalog load and a channel change never interleave on the
//! socket. Outcomes the host UI cares about are also published as
//! [`StbEvent`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use stb_gmscreen::{ClientConfig, JsonFileStore, NoProviderLookup, StbController};
//!
//! let mut stb = StbController::spawn(
//!     ClientConfig::new("192.168.1.12"),
//!     JsonFileStore::new("catalog.json"),
//!     NoProviderLookup,
//! );
//! let mut events = stb.subscribe().unwrap();
//!
//! stb.restore_from_cache().await?;
//! stb.connect(None).await?;
//! stb.load_channels().await?;
//! stb.channel_up().await?;
//! ```

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::catalog::{Catalog, CatalogSync, SyncReport};
use crate::client::{ClientConfig, ConnectionState, StbClient};
use crate::codec::Command;
use crate::error::{Result, StbError};
use crate::parser::parse_stb_time;
use crate::store::{CatalogStore, ProviderLookup};
use crate::types::{Channel, DeviceInfo, Endpoint, StbTime};
use crate::zap::{step_index, Step, ZapGuard, ZapPermit};

const REQUEST_QUEUE_SIZE: usize = 32;
const EVENT_QUEUE_SIZE: usize = 100;

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StbEvent {
    /// Handshake completed
    Connected { address: String },
    /// Connection attempt failed
    ConnectFailed { address: String, reason: String },
    /// Socket closed on request
    Disconnected,
    /// Catalog load progress text
    Progress(String),
    /// Catalog load finished or catalog restored from cache
    ChannelsLoaded { count: usize },
    /// Catalog load aborted
    LoadFailed { reason: String, partial_count: usize },
    /// Channel change failed; reconnecting is advisable
    ZapFailed { program_id: String },
    /// Favorite write batch finished
    FavoritesSaved { success: bool },
}

enum Request {
    Connect {
        endpoint: Option<Endpoint>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    LoadChannels {
        reply: oneshot::Sender<Result<SyncReport>>,
    },
    Zap {
        program_id: String,
        permit: ZapPermit,
        reply: oneshot::Sender<Result<()>>,
    },
    Step {
        step: Step,
        permit: ZapPermit,
        reply: oneshot::Sender<Result<Option<String>>>,
    },
    SaveFavorite {
        channel: Channel,
        reply: oneshot::Sender<bool>,
    },
    SaveFavorites {
        channels: Vec<Channel>,
        reply: oneshot::Sender<bool>,
    },
    GetTime {
        reply: oneshot::Sender<Option<StbTime>>,
    },
    SendKey {
        code: u32,
        reply: oneshot::Sender<bool>,
    },
    RestoreFromCache {
        reply: oneshot::Sender<Result<usize>>,
    },
    Catalog {
        reply: oneshot::Sender<Catalog>,
    },
    CurrentProgramId {
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Handle to a running engine.
///
/// Dropping the handle stops the worker and closes the socket.
pub struct StbController {
    requests: mpsc::Sender<Request>,
    zap: ZapGuard,
    events: Option<mpsc::Receiver<StbEvent>>,
}

impl StbController {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub fn spawn<S, P>(config: ClientConfig, store: S, providers: P) -> Self
    where
        S: CatalogStore + Send + 'static,
        P: ProviderLookup + Send + Sync + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);

        let worker = Worker {
            client: StbClient::new(config),
            catalog: Catalog::new(),
            sync: CatalogSync::new(),
            store,
            providers,
            events: event_tx,
            current_program_id: None,
        };
        tokio::spawn(worker.run(request_rx));

        Self {
            requests: request_tx,
            zap: ZapGuard::new(),
            events: Some(event_rx),
        }
    }

    /// Take the event receiver.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<StbEvent>> {
        self.events.take()
    }

    /// Connect with the full handshake, optionally switching endpoint first.
    pub async fn connect(&self, endpoint: Option<Endpoint>) -> Result<()> {
        self.request(|reply| Request::Connect { endpoint, reply }).await?
    }

    /// Close the socket.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Request::Disconnect { reply }).await
    }

    /// Current connection state.
    pub async fn state(&self) -> Result<ConnectionState> {
        self.request(|reply| Request::State { reply }).await
    }

    /// Reload the whole catalog from the device.
    pub async fn load_channels(&self) -> Result<SyncReport> {
        self.request(|reply| Request::LoadChannels { reply }).await?
    }

    /// Tune to `program_id`.
    ///
    /// Rejected with [`StbError::ZapInFlight`] while an earlier zap is
    /// queued, running or settling.
    pub async fn zap_to_channel(&self, program_id: &str) -> Result<()> {
        let permit = self.zap.try_acquire().ok_or(StbError::ZapInFlight)?;
        let program_id = program_id.to_string();
        self.request(|reply| Request::Zap {
            program_id,
            permit,
            reply,
        })
        .await?
    }

    /// Tune to the next channel in the catalog. Returns the new program id.
    pub async fn channel_up(&self) -> Result<Option<String>> {
        self.step(Step::Next).await
    }

    /// Tune to the previous channel in the catalog. Returns the new program id.
    pub async fn channel_down(&self) -> Result<Option<String>> {
        self.step(Step::Previous).await
    }

    /// Whether a zap is in flight or settling.
    pub fn is_zapping(&self) -> bool {
        self.zap.is_busy()
    }

    /// Write one channel's favorite membership.
    pub async fn save_favorite(&self, channel: Channel) -> Result<bool> {
        self.request(|reply| Request::SaveFavorite { channel, reply })
            .await
    }

    /// Write favorite membership for a batch of channels and persist the
    /// catalog.
    pub async fn save_favorites(&self, channels: Vec<Channel>) -> Result<bool> {
        self.request(|reply| Request::SaveFavorites { channels, reply })
            .await
    }

    /// Read the device clock.
    pub async fn get_stb_time(&self) -> Result<Option<StbTime>> {
        self.request(|reply| Request::GetTime { reply }).await
    }

    /// Press a remote-control key.
    pub async fn send_key(&self, code: u32) -> Result<bool> {
        self.request(|reply| Request::SendKey { code, reply }).await
    }

    /// Load the cached catalog. Returns the restored channel count.
    pub async fn restore_from_cache(&self) -> Result<usize> {
        self.request(|reply| Request::RestoreFromCache { reply })
            .await?
    }

    /// Copy of the current catalog.
    pub async fn catalog(&self) -> Result<Catalog> {
        self.request(|reply| Request::Catalog { reply }).await
    }

    /// Device info from the last catalog load.
    pub async fn device_info(&self) -> Result<Option<DeviceInfo>> {
        Ok(self.catalog().await?.device_info)
    }

    /// Program id of the last successful zap.
    pub async fn current_program_id(&self) -> Result<Option<String>> {
        self.request(|reply| Request::CurrentProgramId { reply })
            .await
    }

    async fn step(&self, step: Step) -> Result<Option<String>> {
        let permit = self.zap.try_acquire().ok_or(StbError::ZapInFlight)?;
        self.request(|reply| Request::Step {
            step,
            permit,
            reply,
        })
        .await?
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .await
            .map_err(|_| StbError::ChannelClosed)?;
        response.await.map_err(|_| StbError::ChannelClosed)
    }
}

struct Worker<S, P> {
    client: StbClient,
    catalog: Catalog,
    sync: CatalogSync,
    store: S,
    providers: P,
    events: mpsc::Sender<StbEvent>,
    current_program_id: Option<String>,
}

impl<S, P> Worker<S, P>
where
    S: CatalogStore + Send + 'static,
    P: ProviderLookup + Send + Sync + 'static,
{
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        debug!(instance = %self.client.instance_id(), "controller started");

        while let Some(request) = requests.recv().await {
            // A dropped reply receiver only means the caller stopped waiting
            match request {
                Request::Connect { endpoint, reply } => {
                    let _ = reply.send(self.connect(endpoint).await);
                }
                Request::Disconnect { reply } => {
                    self.client.disconnect();
                    self.emit(StbEvent::Disconnected);
                    let _ = reply.send(());
                }
                Request::State { reply } => {
                    let _ = reply.send(self.client.state());
                }
                Request::LoadChannels { reply } => {
                    let _ = reply.send(self.load_channels().await);
                }
                Request::Zap {
                    program_id,
                    permit,
                    reply,
                } => {
                    let result = self.zap(&program_id).await;
                    self.settle(permit);
                    let _ = reply.send(result);
                }
                Request::Step {
                    step,
                    permit,
                    reply,
                } => {
                    let _ = reply.send(self.step(step, permit).await);
                }
                Request::SaveFavorite { channel, reply } => {
                    let _ = reply.send(self.save_favorite(&channel).await);
                }
                Request::SaveFavorites { channels, reply } => {
                    let _ = reply.send(self.save_favorites(&channels).await);
                }
                Request::GetTime { reply } => {
                    let _ = reply.send(self.get_stb_time().await);
                }
                Request::SendKey { code, reply } => {
                    let sent = self.client.send_with_retry(&Command::send_key(code)).await;
                    let _ = reply.send(sent);
                }
                Request::RestoreFromCache { reply } => {
                    let _ = reply.send(self.restore_from_cache());
                }
                Request::Catalog { reply } => {
                    let _ = reply.send(self.catalog.clone());
                }
                Request::CurrentProgramId { reply } => {
                    let _ = reply.send(self.current_program_id.clone());
                }
            }
        }

        self.client.disconnect();
        debug!("controller stopped");
    }

    fn emit(&self, event: StbEvent) {
        trace!(?event, "event");
        let _ = self.events.try_send(event);
    }

    async fn connect(&mut self, endpoint: Option<Endpoint>) -> Result<()> {
        if let Some(endpoint) = endpoint {
            self.client.set_endpoint(endpoint);
        }
        let address = self.client.endpoint().to_string();

        match self.client.connect().await {
            Ok(()) => {
                self.emit(StbEvent::Connected { address });
                Ok(())
            }
            Err(e) => {
                self.emit(StbEvent::ConnectFailed {
                    address,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn load_channels(&mut self) -> Result<SyncReport> {
        let events = self.events.clone();
        let result = self
            .sync
            .run(
                &mut self.client,
                &mut self.catalog,
                &mut self.store,
                &self.providers,
                |progress| {
                    let _ = events.try_send(StbEvent::Progress(progress.to_string()));
                },
            )
            .await;

        match &result {
            Ok(report) => self.emit(StbEvent::ChannelsLoaded {
                count: report.channel_count,
            }),
            Err(StbError::SyncFailed {
                reason,
                partial_count,
            }) => self.emit(StbEvent::LoadFailed {
                reason: reason.clone(),
                partial_count: *partial_count,
            }),
            Err(e) => self.emit(StbEvent::LoadFailed {
                reason: e.to_string(),
                partial_count: self.catalog.len(),
            }),
        }
        result
    }

    async fn zap(&mut self, program_id: &str) -> Result<()> {
        let result = match self.client.ensure_silent_connection().await {
            Ok(()) => {
                let command = Command::change_channel(program_id);
                if self.client.send_with_retry(&command).await {
                    Ok(())
                } else {
                    Err(StbError::Send)
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(program_id, "channel changed");
                self.current_program_id = Some(program_id.to_string());
                Ok(())
            }
            Err(e) => {
                warn!(program_id, error = %e, "channel change failed");
                self.emit(StbEvent::ZapFailed {
                    program_id: program_id.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Nothing is sent for an empty catalog, so the permit is released at once.
    async fn step(&mut self, step: Step, permit: ZapPermit) -> Result<Option<String>> {
        let Some(index) = step_index(
            &self.catalog.channels,
            self.current_program_id.as_deref(),
            step,
        ) else {
            debug!(?step, "no channels to step through");
            drop(permit);
            return Ok(None);
        };

        let program_id = self.catalog.channels[index].program_id.clone();
        let result = self.zap(&program_id).await;
        self.settle(permit);
        result.map(|()| Some(program_id))
    }

    /// Release the zap flag once the tuner has had time to settle.
    fn settle(&self, permit: ZapPermit) {
        let delay = self.client.config().zap_settle;
        tokio::spawn(async move {
            sleep(delay).await;
            drop(permit);
        });
    }

    async fn save_favorite(&mut self, channel: &Channel) -> bool {
        if let Err(e) = self.client.ensure_connected().await {
            warn!(error = %e, "cannot save favorite");
            return false;
        }
        let sent = self.client.send(&Command::set_favorite(channel)).await;
        if sent {
            self.catalog.apply_favorites(channel);
        }
        sent
    }

    async fn save_favorites(&mut self, channels: &[Channel]) -> bool {
        let success = match self.client.ensure_connected().await {
            Ok(()) => self.write_favorites(channels).await,
            Err(e) => {
                warn!(error = %e, "cannot save favorites");
                false
            }
        };

        if success {
            for channel in channels {
                self.catalog.apply_favorites(channel);
            }
            if let Err(e) = self
                .store
                .save_catalog(&self.catalog.channels, &self.catalog.favorite_groups)
            {
                warn!(error = %e, "could not persist favorites");
            }
        }

        info!(count = channels.len(), success, "favorites saved");
        self.emit(StbEvent::FavoritesSaved { success });
        success
    }

    async fn write_favorites(&mut self, channels: &[Channel]) -> bool {
        let pacing = self.client.config().favorite_pacing;
        let mut all_sent = true;
        for (i, channel) in channels.iter().enumerate() {
            if i > 0 && !pacing.is_zero() {
                sleep(pacing).await;
            }
            if !self.client.send(&Command::set_favorite(channel)).await {
                warn!(program_id = %channel.program_id, "favorite write failed");
                all_sent = false;
            }
        }
        all_sent
    }

    async fn get_stb_time(&mut self) -> Option<StbTime> {
        if let Err(e) = self.client.ensure_silent_connection().await {
            warn!(error = %e, "cannot read device time");
            return None;
        }
        let wait = self.client.config().time_timeout;
        let xml = self.client.send_and_await(&Command::get_time(), wait).await?;
        parse_stb_time(&xml)
    }

    fn restore_from_cache(&mut self) -> Result<usize> {
        let snapshot = self.store.load_catalog()?;
        self.catalog.restore(snapshot);
        let count = self.catalog.len();
        info!(
            channels = count,
            groups = self.catalog.favorite_groups.len(),
            "catalog restored from cache"
        );
        if count > 0 {
            self.emit(StbEvent::ChannelsLoaded { count });
        }
        Ok(count)
    }
}
