//! Response parsers.
//!
//! This module turns inflated response text into channels, favorite groups,
//! device identity and device time. Records missing their key fields are
//! skipped; numeric fields that fail to parse default to zero.

use tracing::debug;

use crate::payload::{extract_records, extract_tag};
use crate::store::ProviderLookup;
use crate::types::{parse_favor_group_ids, Channel, DeviceInfo, FavoriteGroup, ProgramType, StbTime};

/// Device tags that may carry the provider name, in order of preference.
pub const PROVIDER_TAGS: [&str; 3] = ["ServiceProviderName", "ProviderName", "ISPName"];

fn parse_num<T: std::str::FromStr + Default>(s: &str) -> T {
    s.trim().parse().unwrap_or_default()
}

/// Parse every channel record of a `GetChannels` response.
///
/// Records with an empty `ProgramId` or `ProgramName` are skipped. When the
/// device names no provider, `providers` is asked.
///
/// # Example
///
/// ```rust,ignore
/// let xml = envelope.inflate()?;
/// for channel in parse_channels(&xml, &NoProviderLookup) {
///     println!("{} {}", channel.program_id, channel.name);
/// }
/// ```
pub fn parse_channels<P>(xml: &str, providers: &P) -> Vec<Channel>
where
    P: ProviderLookup + ?Sized,
{
    let channels: Vec<Channel> = extract_records(xml)
        .filter_map(|record| parse_channel(record, providers))
        .collect();

    let with_provider = channels.iter().filter(|c| !c.provider.is_empty()).count();
    debug!(
        count = channels.len(),
        with_provider, "parsed channel records"
    );
    channels
}

/// Parse a single `<parm>` channel record body.
pub fn parse_channel<P>(record: &str, providers: &P) -> Option<Channel>
where
    P: ProviderLookup + ?Sized,
{
    let program_id = extract_tag(record, "ProgramId");
    let name = extract_tag(record, "ProgramName");
    if program_id.is_empty() || name.is_empty() {
        return None;
    }

    let device_provider = PROVIDER_TAGS
        .iter()
        .map(|tag| extract_tag(record, tag).trim())
        .find(|provider| !provider.is_empty());
    let provider = match device_provider {
        Some(provider) => provider.to_string(),
        None => providers.lookup_provider(name),
    };

    let mut channel = Channel::new(program_id, name);
    channel.index = parse_num(extract_tag(record, "ProgramIndex"));
    channel.program_type = ProgramType::from_device(parse_num(extract_tag(record, "ProgramType")));
    channel.is_hd = extract_tag(record, "IsProgramHD").trim() == "1";
    channel.is_locked = extract_tag(record, "LockMark").trim() == "1";
    channel.channel_type = parse_num(extract_tag(record, "ChannelType"));
    channel.provider = provider;

    // The group list is authoritative; the mark only fills in when it is absent
    let groups = parse_favor_group_ids(extract_tag(record, "FavorGroupID"));
    if groups.is_empty() {
        channel.set_fav_mark(parse_num(extract_tag(record, "FavMark")));
    } else {
        channel.set_favorite_groups(groups);
    }

    Some(channel)
}

/// Parse a `GetFavoriteGroups` response.
///
/// Keeps records with a positive id and a non-empty name.
pub fn parse_favorite_groups(xml: &str) -> Vec<FavoriteGroup> {
    extract_records(xml)
        .filter_map(|record| {
            let id: u8 = parse_num(extract_tag(record, "FavorGroupID"));
            let name = extract_tag(record, "favorGroupName");
            (id > 0 && !name.is_empty()).then(|| FavoriteGroup::new(id, name))
        })
        .collect()
}

/// Parse a `GetStbInfo` response.
pub fn parse_device_info(xml: &str) -> DeviceInfo {
    let channel_count = extract_tag(xml, "ChannelNum")
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|count| *count > 0);

    DeviceInfo {
        product_name: extract_tag(xml, "ProductName").to_string(),
        software_version: extract_tag(xml, "SoftwareVersion").to_string(),
        serial_number: extract_tag(xml, "SerialNumber").to_string(),
        channel_count,
    }
}

/// Parse a `GetTime` response. `None` unless it carries `<StbMonth>`.
pub fn parse_stb_time(xml: &str) -> Option<StbTime> {
    if !xml.contains("<StbMonth>") {
        return None;
    }
    Some(StbTime {
        month: parse_num(extract_tag(xml, "StbMonth")),
        day: parse_num(extract_tag(xml, "StbDay")),
        hour: parse_num(extract_tag(xml, "StbHour")),
        minute: parse_num(extract_tag(xml, "StbMin")),
    })
}
