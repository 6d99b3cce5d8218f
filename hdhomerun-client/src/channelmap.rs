//! Channel map → scan group resolution.

use crate::error::ResolverError;

const US_CABLE_GROUP: &str = "us-cable us-hrc us-irc";

static CHANNELMAP_SCAN_GROUPS: &[(&str, &str)] = &[
    ("au-bcast", "au-bcast"),
    ("au-cable", "au-cable"),
    ("eu-bcast", "eu-bcast"),
    ("eu-cable", "eu-cable"),
    ("tw-bcast", "tw-bcast"),
    ("tw-cable", "tw-cable"),
    ("kr-bcast", "kr-bcast"),
    ("kr-cable", "kr-cable"),
    ("us-bcast", "us-bcast"),
    ("us-cable", US_CABLE_GROUP),
    ("us-hrc", US_CABLE_GROUP),
    ("us-irc", US_CABLE_GROUP),
];

/// Scan group to initialise a channel scan with for `channelmap`.
///
/// The US cable plans share one group so a single scan covers all three
/// frequency layouts.
pub fn resolve_scan_group(channelmap: &str) -> Result<&'static str, ResolverError> {
    CHANNELMAP_SCAN_GROUPS
        .iter()
        .find(|(name, _)| *name == channelmap)
        .map(|(_, group)| *group)
        .ok_or_else(|| ResolverError::UnknownChannelmap(channelmap.to_string()))
}

/// All channel map names [`resolve_scan_group`] accepts.
pub fn supported_channelmaps() -> impl Iterator<Item = &'static str> {
    CHANNELMAP_SCAN_GROUPS.iter().map(|(name, _)| *name)
}
