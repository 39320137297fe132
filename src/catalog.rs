//! Channel catalog and its bulk load from the device.
//!
//! A load walks a fixed sequence:
//!
//! ```text
//! Idle → FetchingFavoriteGroups → FetchingDeviceInfo → FetchingChannelPage(0)
//!      → FetchingChannelPage(100) → ... → Idle | Failed
//! ```
//!
//! Favorite groups are persisted as soon as they arrive so they survive a
//! failed channel fetch. Paging stops at the reported channel count or after
//! a run of empty pages, whichever comes first.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::client::StbClient;
use crate::codec::Command;
use crate::error::{Result, StbError};
use crate::parser::{parse_channels, parse_device_info, parse_favorite_groups};
use crate::store::{CatalogSnapshot, CatalogStore, ProviderLookup};
use crate::types::{Channel, DeviceInfo, FavoriteGroup};

/// In-memory channel catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    /// Channels in device pagination order
    pub channels: Vec<Channel>,
    /// Favorite groups
    pub favorite_groups: Vec<FavoriteGroup>,
    /// Last device info fetched
    pub device_info: Option<DeviceInfo>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the catalog has no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Look up a channel by program id.
    pub fn find(&self, program_id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.program_id == program_id)
    }

    /// Position of a channel by program id.
    pub fn position(&self, program_id: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.program_id == program_id)
    }

    /// Copy the favorite membership of `updated` onto the stored channel.
    ///
    /// Returns false if the catalog has no channel with that program id.
    pub fn apply_favorites(&mut self, updated: &Channel) -> bool {
        match self
            .channels
            .iter_mut()
            .find(|c| c.program_id == updated.program_id)
        {
            Some(channel) => {
                channel.set_favorite_groups(updated.favorite_groups().iter().copied());
                true
            }
            None => false,
        }
    }

    /// Replace contents with a cached snapshot.
    ///
    /// Favorite groups are only replaced when the snapshot has some.
    pub fn restore(&mut self, snapshot: CatalogSnapshot) {
        self.channels = snapshot.channels;
        if !snapshot.favorite_groups.is_empty() {
            self.favorite_groups = snapshot.favorite_groups;
        }
    }

    /// Persistable copy of the catalog.
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            channels: self.channels.clone(),
            favorite_groups: self.favorite_groups.clone(),
        }
    }
}

/// Catalog load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No load running
    Idle,
    /// Waiting for the favorite group list
    FetchingFavoriteGroups,
    /// Waiting for device info
    FetchingDeviceInfo,
    /// Waiting for the page starting at `offset`
    FetchingChannelPage { offset: u32 },
    /// Last load failed
    Failed,
}

/// Progress notifications emitted during a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncProgress {
    /// Requesting the favorite group list
    FavoriteGroups,
    /// Requesting device info
    DeviceInfo,
    /// Requesting the next channel page
    Channels {
        /// Channels received so far
        loaded: usize,
        /// Channel count the load aims for
        total: u32,
    },
}

impl fmt::Display for SyncProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FavoriteGroups => write!(f, "Favorites..."),
            Self::DeviceInfo => write!(f, "Device info..."),
            Self::Channels { loaded, total } => write!(f, "{loaded}/{total}..."),
        }
    }
}

/// Outcome of a completed load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Channels in the catalog after the load
    pub channel_count: usize,
    /// Favorite groups in the catalog after the load
    pub favorite_group_count: usize,
    /// Channel count the pagination aimed for
    pub target_count: u32,
    /// Page requests sent
    pub pages_requested: u32,
    /// Whether paging ended on the empty-page limit
    pub stopped_on_empty_pages: bool,
}

/// Bulk catalog loader.
#[derive(Debug)]
pub struct CatalogSync {
    state: SyncState,
}

impl Default for CatalogSync {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogSync {
    /// Create an idle loader.
    pub fn new() -> Self {
        Self {
            state: SyncState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Run a full load into `catalog`.
    ///
    /// Connects first if needed and clears the channel list. On failure the
    /// channels from pages already received stay in the catalog.
    pub async fn run<S, P, F>(
        &mut self,
        client: &mut StbClient,
        catalog: &mut Catalog,
        store: &mut S,
        providers: &P,
        mut progress: F,
    ) -> Result<SyncReport>
    where
        S: CatalogStore + ?Sized,
        P: ProviderLookup + ?Sized,
        F: FnMut(SyncProgress),
    {
        let result = self
            .load(client, catalog, store, providers, &mut progress)
            .await;

        match result {
            Ok(report) => {
                self.state = SyncState::Idle;
                info!(
                    channels = report.channel_count,
                    groups = report.favorite_group_count,
                    pages = report.pages_requested,
                    "channel load complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.state = SyncState::Failed;
                warn!(error = %e, partial = catalog.len(), "channel load failed");
                Err(match e {
                    e @ StbError::SyncFailed { .. } => e,
                    e => StbError::SyncFailed {
                        reason: e.to_string(),
                        partial_count: catalog.len(),
                    },
                })
            }
        }
    }

    async fn load<S, P, F>(
        &mut self,
        client: &mut StbClient,
        catalog: &mut Catalog,
        store: &mut S,
        providers: &P,
        progress: &mut F,
    ) -> Result<SyncReport>
    where
        S: CatalogStore + ?Sized,
        P: ProviderLookup + ?Sized,
        F: FnMut(SyncProgress),
    {
        client.ensure_connected().await?;
        catalog.channels.clear();
        let config = client.config().clone();

        self.state = SyncState::FetchingFavoriteGroups;
        progress(SyncProgress::FavoriteGroups);
        match client
            .send_and_await(&Command::get_favorite_groups(), config.favorites_timeout)
            .await
        {
            Some(xml) => {
                catalog.favorite_groups = parse_favorite_groups(&xml);
                debug!(count = catalog.favorite_groups.len(), "favorite groups loaded");
                if let Err(e) = store.save_favorite_groups(&catalog.favorite_groups) {
                    warn!(error = %e, "could not persist favorite groups");
                }
            }
            None => {
                ensure_alive(client, catalog)?;
                warn!("no favorite group response");
            }
        }

        self.state = SyncState::FetchingDeviceInfo;
        progress(SyncProgress::DeviceInfo);
        let mut target = config.fallback_channel_count;
        match client
            .send_and_await(&Command::get_stb_info(), config.info_timeout)
            .await
        {
            Some(xml) => {
                let info = parse_device_info(&xml);
                match info.channel_count {
                    Some(count) => target = count,
                    None => warn!(fallback = target, "device reported no channel count"),
                }
                debug!(product = %info.product_name, channels = target, "device info");
                catalog.device_info = Some(info);
            }
            None => {
                ensure_alive(client, catalog)?;
                warn!(fallback = target, "no device info response");
            }
        }

        let page_size = config.page_size.max(1);
        let mut seen: HashSet<String> = HashSet::new();
        let mut offset = 0u32;
        let mut empty_pages = 0u32;
        let mut pages_requested = 0u32;

        while offset < target && empty_pages < config.max_empty_pages {
            self.state = SyncState::FetchingChannelPage { offset };
            progress(SyncProgress::Channels {
                loaded: catalog.len(),
                total: target,
            });

            let to = offset.saturating_add(page_size - 1);
            pages_requested += 1;
            let response = client
                .send_and_await(&Command::get_channels(offset, to), config.page_timeout)
                .await;

            match response {
                Some(xml) => {
                    let parsed = parse_channels(&xml, providers);
                    if parsed.is_empty() {
                        empty_pages += 1;
                        warn!(from = offset, to, "empty channel page");
                    } else {
                        empty_pages = 0;
                        let before = catalog.len();
                        catalog
                            .channels
                            .extend(parsed.into_iter().filter(|c| seen.insert(c.program_id.clone())));
                        debug!(
                            from = offset,
                            to,
                            added = catalog.len() - before,
                            total = catalog.len(),
                            "channel page loaded"
                        );
                    }
                }
                None => {
                    ensure_alive(client, catalog)?;
                    empty_pages += 1;
                    warn!(from = offset, to, "no response for channel page");
                }
            }

            offset = offset.saturating_add(page_size);
        }

        if let Err(e) = store.save_catalog(&catalog.channels, &catalog.favorite_groups) {
            warn!(error = %e, "could not persist catalog");
        }

        Ok(SyncReport {
            channel_count: catalog.len(),
            favorite_group_count: catalog.favorite_groups.len(),
            target_count: target,
            pages_requested,
            stopped_on_empty_pages: empty_pages >= config.max_empty_pages,
        })
    }
}

/// A missing response is tolerated only while the socket is still open.
fn ensure_alive(client: &StbClient, catalog: &Catalog) -> Result<()> {
    if client.is_connected() {
        Ok(())
    } else {
        Err(StbError::SyncFailed {
            reason: "connection lost".into(),
            partial_count: catalog.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NoProviderLookup};
    use crate::testing::{channel_pages, corrupt_frame, fast_config, MockStb, Reply};
    use crate::types::CommandCode;

    const FAVORITES: &str = "<parm><FavorGroupID>1</FavorGroupID><favorGroupName>News</favorGroupName></parm>\
                             <parm><FavorGroupID>2</FavorGroupID><favorGroupName>Kids</favorGroupName></parm>";

    fn page_requests(mock: &MockStb) -> usize {
        mock.received_codes()
            .iter()
            .filter(|code| **code == CommandCode::GetChannels.as_u16())
            .count()
    }

    async fn run_sync(mock: &MockStb) -> (Result<SyncReport>, Catalog, MemoryStore, SyncState) {
        let mut client = StbClient::new(fast_config(mock.address()));
        let mut catalog = Catalog::new();
        let mut store = MemoryStore::new();
        let mut sync = CatalogSync::new();
        let result = sync
            .run(&mut client, &mut catalog, &mut store, &NoProviderLookup, |_| {})
            .await;
        (result, catalog, store, sync.state())
    }

    #[tokio::test]
    async fn test_full_load() {
        let mock = MockStb::start().await;
        mock.respond(CommandCode::GetFavoriteGroups, FAVORITES);
        mock.respond(
            CommandCode::GetStbInfo,
            "<ProductName>HD-9800</ProductName><ChannelNum>250</ChannelNum>",
        );
        mock.respond_with(CommandCode::GetChannels, channel_pages(250));

        let (result, catalog, store, state) = run_sync(&mock).await;
        let report = result.unwrap();

        assert_eq!(state, SyncState::Idle);
        assert_eq!(report.channel_count, 250);
        assert_eq!(report.target_count, 250);
        assert_eq!(report.pages_requested, 3);
        assert!(!report.stopped_on_empty_pages);
        assert_eq!(catalog.channels[0].program_id, "00000000000000");
        assert_eq!(catalog.channels[249].name, "Channel 249");
        assert_eq!(catalog.favorite_groups.len(), 2);
        assert_eq!(
            catalog.device_info.as_ref().map(|i| i.product_name.as_str()),
            Some("HD-9800")
        );

        assert_eq!(store.snapshot().channels.len(), 250);
        assert_eq!(store.snapshot().favorite_groups.len(), 2);

        let pages: Vec<_> = mock
            .received()
            .into_iter()
            .filter(|r| r.code == CommandCode::GetChannels.as_u16())
            .map(|r| r.payload.unwrap())
            .collect();
        assert_eq!(
            pages[1],
            "<parm><FromIndex>100</FromIndex><ToIndex>199</ToIndex></parm>"
        );
    }

    #[tokio::test]
    async fn test_load_stops_after_empty_pages() {
        let mock = MockStb::start().await;
        mock.respond(CommandCode::GetFavoriteGroups, FAVORITES);
        // No ChannelNum: the fallback of 3500 is the target
        mock.respond(CommandCode::GetStbInfo, "<ProductName>X</ProductName>");
        mock.respond_with(CommandCode::GetChannels, channel_pages(200));

        let (result, catalog, _, _) = run_sync(&mock).await;
        let report = result.unwrap();

        assert_eq!(report.target_count, 3500);
        assert_eq!(report.channel_count, 200);
        assert_eq!(report.pages_requested, 5);
        assert!(report.stopped_on_empty_pages);
        assert_eq!(catalog.len(), 200);
        assert_eq!(page_requests(&mock), 5);
    }

    #[tokio::test]
    async fn test_silent_device_counts_as_empty_pages() {
        let mock = MockStb::start().await;

        let (result, catalog, store, _) = run_sync(&mock).await;
        let report = result.unwrap();

        assert_eq!(report.pages_requested, 3);
        assert_eq!(report.channel_count, 0);
        assert!(catalog.favorite_groups.is_empty());
        assert!(store.snapshot().channels.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_pages_count_as_empty() {
        let mock = MockStb::start().await;
        mock.respond(CommandCode::GetStbInfo, "<ChannelNum>500</ChannelNum>");
        mock.respond_with(CommandCode::GetChannels, |_| Reply::Raw(corrupt_frame()));

        let mut client = StbClient::new(fast_config(mock.address()));
        let mut catalog = Catalog::new();
        let report = CatalogSync::new()
            .run(&mut client, &mut catalog, &mut MemoryStore::new(), &NoProviderLookup, |_| {})
            .await
            .unwrap();

        assert_eq!(report.channel_count, 0);
        assert_eq!(report.pages_requested, 3);
        assert!(report.stopped_on_empty_pages);
        assert!(client.is_connected());
        assert_eq!(page_requests(&mock), 3);
    }

    #[tokio::test]
    async fn test_connection_loss_keeps_partial_catalog() {
        let mock = MockStb::start().await;
        mock.respond(CommandCode::GetFavoriteGroups, FAVORITES);
        mock.respond(CommandCode::GetStbInfo, "<ChannelNum>500</ChannelNum>");
        let pages = channel_pages(500);
        mock.respond_with(CommandCode::GetChannels, move |request| {
            let payload = request.payload.as_deref().unwrap_or_default();
            if payload.contains("<FromIndex>200</FromIndex>") {
                Reply::Close
            } else {
                pages(request)
            }
        });

        let (result, catalog, store, state) = run_sync(&mock).await;

        match result {
            Err(StbError::SyncFailed { partial_count, .. }) => assert_eq!(partial_count, 200),
            other => panic!("expected SyncFailed, got {other:?}"),
        }
        assert_eq!(state, SyncState::Failed);
        assert_eq!(catalog.len(), 200);
        // Favorites were persisted before paging; the channels were not
        assert_eq!(store.snapshot().favorite_groups.len(), 2);
        assert!(store.snapshot().channels.is_empty());
    }

    #[tokio::test]
    async fn test_load_fails_when_device_unreachable() {
        let address = MockStb::unused_address().await;
        let mut client = StbClient::new(fast_config(&address));
        let mut catalog = Catalog::new();
        catalog.channels.push(Channel::new("1", "Old"));
        let mut sync = CatalogSync::new();

        let result = sync
            .run(&mut client, &mut catalog, &mut MemoryStore::new(), &NoProviderLookup, |_| {})
            .await;

        assert!(matches!(result, Err(StbError::SyncFailed { partial_count: 1, .. })));
        assert_eq!(sync.state(), SyncState::Failed);
    }

    #[tokio::test]
    async fn test_duplicate_program_ids_are_dropped() {
        let mock = MockStb::start().await;
        mock.respond(CommandCode::GetStbInfo, "<ChannelNum>200</ChannelNum>");
        // Device ignores the requested range and always sends the first page
        mock.respond(
            CommandCode::GetChannels,
            "<parm><ProgramId>1</ProgramId><ProgramName>A</ProgramName></parm>\
             <parm><ProgramId>2</ProgramId><ProgramName>B</ProgramName></parm>",
        );

        let (result, catalog, _, _) = run_sync(&mock).await;
        assert_eq!(result.unwrap().pages_requested, 2);
        assert_eq!(catalog.len(), 2);
    }

    #[tokio::test]
    async fn test_progress_reports() {
        let mock = MockStb::start().await;
        mock.respond(CommandCode::GetStbInfo, "<ChannelNum>150</ChannelNum>");
        mock.respond_with(CommandCode::GetChannels, channel_pages(150));

        let mut client = StbClient::new(fast_config(mock.address()));
        let mut catalog = Catalog::new();
        let mut seen = Vec::new();
        CatalogSync::new()
            .run(&mut client, &mut catalog, &mut MemoryStore::new(), &NoProviderLookup, |p| {
                seen.push(p)
            })
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                SyncProgress::FavoriteGroups,
                SyncProgress::DeviceInfo,
                SyncProgress::Channels { loaded: 0, total: 150 },
                SyncProgress::Channels { loaded: 100, total: 150 },
            ]
        );
        assert_eq!(seen[3].to_string(), "100/150...");
    }

    #[test]
    fn test_catalog_restore_and_apply_favorites() {
        let mut catalog = Catalog::new();
        catalog.favorite_groups.push(FavoriteGroup::new(1, "Kept"));
        catalog.restore(CatalogSnapshot {
            channels: vec![Channel::new("1", "A"), Channel::new("2", "B")],
            favorite_groups: vec![],
        });
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.favorite_groups[0].name, "Kept");

        let mut updated = Channel::new("2", "B");
        updated.add_to_favorite_group(4);
        assert!(catalog.apply_favorites(&updated));
        assert_eq!(catalog.find("2").unwrap().fav_mark(), 0b1000);
        assert!(!catalog.apply_favorites(&Channel::new("9", "Z")));
        assert_eq!(catalog.position("2"), Some(1));
    }
}
