/// Catalog of the messages described in "ANT Message Protocol and Format".
/// Each entry maps a message name to its id and the binary layout of its
/// payload, so the dialect can pack and unpack messages without a hand
/// written encoder per message.
use std::collections::HashMap;
use std::sync::OnceLock;

use FieldKind::*;

/// Wire type of a single payload field. All multi-byte values are little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// A padding byte. Written as zero, skipped when unpacking, takes no argument.
    Pad,
    U8,
    Bool,
    U16,
    U32,
    U64,
    /// Fixed width byte string.
    Bytes(usize),
}

impl FieldKind {
    pub const fn width(&self) -> usize {
        match self {
            Pad | U8 | Bool => 1,
            U16 => 2,
            U32 => 4,
            U64 => 8,
            Bytes(n) => *n,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> Field {
    Field { name, kind }
}

const PAD: Field = field("", Pad);

/// Total width in bytes of a payload layout.
pub fn layout_width(layout: &[Field]) -> usize {
    layout.iter().map(|f| f.kind.width()).sum()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub msg_id: u8,
    pub layout: &'static [Field],
}

impl CatalogEntry {
    pub const fn new(name: &'static str, msg_id: u8, layout: &'static [Field]) -> Self {
        CatalogEntry {
            name,
            msg_id,
            layout,
        }
    }

    /// Fixed width of the payload, not counting any extended data.
    pub fn width(&self) -> usize {
        layout_width(self.layout)
    }

    /// Number of arguments needed to encode this message (padding excluded).
    pub fn arity(&self) -> usize {
        self.layout.iter().filter(|f| f.kind != Pad).count()
    }
}

/// Messages the host sends to the radio.
pub static ANT_ALL_FUNCTIONS: &[CatalogEntry] = &[
    CatalogEntry::new("UnassignChannel", 0x41, &[field("channel_number", U8)]),
    CatalogEntry::new(
        "AssignChannel",
        0x42,
        &[
            field("channel_number", U8),
            field("channel_type", U8),
            field("network_number", U8),
        ],
    ),
    CatalogEntry::new(
        "AssignChannelExtended",
        0x42,
        &[
            field("channel_number", U8),
            field("channel_type", U8),
            field("network_number", U8),
            field("extended_attrs", U8),
        ],
    ),
    CatalogEntry::new(
        "SetChannelId",
        0x51,
        &[
            field("channel_number", U8),
            field("device_number", U16),
            field("device_type_id", U8),
            field("trans_type", U8),
        ],
    ),
    CatalogEntry::new(
        "SetChannelPeriod",
        0x43,
        &[field("channel_number", U8), field("message_period", U16)],
    ),
    CatalogEntry::new(
        "SetChannelSearchTimeout",
        0x44,
        &[field("channel_number", U8), field("search_timeout", U8)],
    ),
    CatalogEntry::new(
        "SetChannelRfFreq",
        0x45,
        &[field("channel_number", U8), field("rf_frequency", U8)],
    ),
    CatalogEntry::new(
        "SetNetworkKey",
        0x46,
        &[field("network_number", U8), field("key", U64)],
    ),
    CatalogEntry::new("SetTransmitPower", 0x47, &[PAD, field("tx_power", U8)]),
    CatalogEntry::new(
        "SetChannelSearchWaveform",
        0x49,
        &[field("channel_number", U8), field("waveform", U16)],
    ),
    CatalogEntry::new(
        "AddChannelId",
        0x59,
        &[
            field("channel_number", U8),
            field("device_number", U16),
            field("device_type_id", U8),
            field("trans_type", U8),
            field("list_index", U8),
        ],
    ),
    CatalogEntry::new(
        "ConfigList",
        0x5A,
        &[
            field("channel_number", U8),
            field("list_size", U8),
            field("exclude", Bool),
        ],
    ),
    CatalogEntry::new(
        "SetChannelTxPower",
        0x60,
        &[field("channel_number", U8), field("tx_power", U8)],
    ),
    CatalogEntry::new(
        "SetLowPriorityChannelSearchTimeout",
        0x63,
        &[field("channel_number", U8), field("search_timeout", U8)],
    ),
    CatalogEntry::new(
        "SetSerialNumChannelId",
        0x65,
        &[
            field("channel_number", U8),
            field("device_type_id", U8),
            field("trans_type", U8),
        ],
    ),
    CatalogEntry::new("RxExtMesgsEnable", 0x66, &[PAD, field("enable", Bool)]),
    CatalogEntry::new("EnableLed", 0x68, &[PAD, field("enable", Bool)]),
    CatalogEntry::new("CrystalEnable", 0x6D, &[PAD]),
    CatalogEntry::new("LibConfig", 0x6E, &[PAD, field("lib_config", U8)]),
    CatalogEntry::new(
        "ConfigFrequencyAgility",
        0x70,
        &[
            field("channel_number", U8),
            field("freq1", U8),
            field("freq2", U8),
            field("freq3", U8),
        ],
    ),
    CatalogEntry::new(
        "SetProximitySearch",
        0x71,
        &[field("channel_number", U8), field("search_threshold_id", U8)],
    ),
    CatalogEntry::new(
        "SetChannelSearchPriority",
        0x75,
        &[field("channel_number", U8), field("search_priority", U8)],
    ),
    CatalogEntry::new("ResetSystem", 0x4A, &[PAD]),
    CatalogEntry::new("OpenChannel", 0x4B, &[field("channel_number", U8)]),
    CatalogEntry::new("CloseChannel", 0x4C, &[field("channel_number", U8)]),
    CatalogEntry::new("OpenRxScanMode", 0x5B, &[PAD]),
    CatalogEntry::new(
        "RequestMessage",
        0x4D,
        &[field("channel_number", U8), field("message_id", U8)],
    ),
    CatalogEntry::new("SleepMessage", 0xC5, &[PAD]),
    CatalogEntry::new(
        "SendBroadcastData",
        0x4E,
        &[field("channel_number", U8), field("data", Bytes(8))],
    ),
    CatalogEntry::new(
        "SendAcknowledgedData",
        0x4F,
        &[field("channel_number", U8), field("data", Bytes(8))],
    ),
    CatalogEntry::new(
        "SendBurstTransferPacket",
        0x50,
        &[field("channel_number", U8), field("data", Bytes(8))],
    ),
    CatalogEntry::new("InitCWTestMode", 0x53, &[PAD]),
    CatalogEntry::new(
        "SetCwTestMode",
        0x48,
        &[PAD, field("tx_power", U8), field("rf_freq", U8)],
    ),
];

/// Messages the radio sends back to the host.
pub static ANT_ALL_CALLBACKS: &[CatalogEntry] = &[
    CatalogEntry::new(
        "ChannelResponse",
        0x40,
        &[
            field("channel_number", U8),
            field("message_id", U8),
            field("message_code", U8),
        ],
    ),
    CatalogEntry::new("StartupMessage", 0x6F, &[field("startup_message", U8)]),
    CatalogEntry::new(
        "Capabilities",
        0x54,
        &[
            field("max_channels", U8),
            field("max_networks", U8),
            field("standard_options", U8),
            field("advanced_options", U8),
            field("advanced_options_2", U8),
            field("max_sensrcore_channels", U8),
        ],
    ),
    CatalogEntry::new(
        "ChannelId",
        0x51,
        &[
            field("channel_number", U8),
            field("device_number", U16),
            field("device_type_id", U8),
            field("trans_type", U8),
        ],
    ),
    CatalogEntry::new(
        "ChannelStatus",
        0x52,
        &[field("channel_number", U8), field("channel_status", U8)],
    ),
    CatalogEntry::new("SerialNumber", 0x61, &[field("serial_number", U32)]),
    CatalogEntry::new(
        "BroadcastData",
        0x4E,
        &[field("channel_number", U8), field("data", Bytes(8))],
    ),
    CatalogEntry::new(
        "AcknowledgedData",
        0x4F,
        &[field("channel_number", U8), field("data", Bytes(8))],
    ),
    CatalogEntry::new(
        "BurstTransferData",
        0x50,
        &[field("channel_number", U8), field("data", Bytes(8))],
    ),
];

/// An immutable index over a set of catalog entries, by message id and by name.
/// Message ids are not unique (extended variants share the id of the plain
/// message), names are.
#[derive(Clone, Debug)]
pub struct Catalog {
    entries: Vec<&'static CatalogEntry>,
    by_id: HashMap<u8, Vec<usize>>,
    by_name: HashMap<&'static str, usize>,
}

impl Catalog {
    /// Builds the index. Panics if two entries share a name.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'static CatalogEntry>,
    {
        let entries: Vec<&'static CatalogEntry> = entries.into_iter().collect();
        let mut by_id: HashMap<u8, Vec<usize>> = HashMap::new();
        let mut by_name = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            by_id.entry(entry.msg_id).or_default().push(index);
            let previous = by_name.insert(entry.name, index);
            assert!(
                previous.is_none(),
                "duplicate catalog entry name {}",
                entry.name
            );
        }
        Catalog {
            entries,
            by_id,
            by_name,
        }
    }

    /// Catalog of every command the host can send.
    pub fn functions() -> &'static Catalog {
        static FUNCTIONS: OnceLock<Catalog> = OnceLock::new();
        FUNCTIONS.get_or_init(|| Catalog::new(ANT_ALL_FUNCTIONS))
    }

    /// Catalog of every reply and event the radio can send.
    pub fn callbacks() -> &'static Catalog {
        static CALLBACKS: OnceLock<Catalog> = OnceLock::new();
        CALLBACKS.get_or_init(|| Catalog::new(ANT_ALL_CALLBACKS))
    }

    pub fn entries(&self) -> impl Iterator<Item = &'static CatalogEntry> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry registered for `msg_id`.
    pub fn lookup_id(&self, msg_id: u8) -> Option<&'static CatalogEntry> {
        self.candidates(msg_id).next()
    }

    pub fn lookup_name(&self, name: &str) -> Option<&'static CatalogEntry> {
        self.by_name.get(name).map(|&i| self.entries[i])
    }

    /// All entries sharing `msg_id`, in registration order.
    pub fn candidates(&self, msg_id: u8) -> impl Iterator<Item = &'static CatalogEntry> + '_ {
        self.by_id
            .get(&msg_id)
            .into_iter()
            .flatten()
            .map(move |&i| self.entries[i])
    }

    /// Picks the layout to use for a payload of `payload_len` bytes. An exact
    /// width match wins, otherwise the widest layout that still fits is used
    /// and the remainder is extended data.
    pub fn resolve(&self, msg_id: u8, payload_len: usize) -> Option<&'static CatalogEntry> {
        let mut fitting: Option<&'static CatalogEntry> = None;
        for entry in self.candidates(msg_id) {
            let width = entry.width();
            if width == payload_len {
                return Some(entry);
            }
            if width < payload_len && fitting.map_or(true, |f| f.width() < width) {
                fitting = Some(entry);
            }
        }
        fitting
    }

    /// Entry for `msg_id` taking exactly `arity` arguments.
    pub fn resolve_arity(&self, msg_id: u8, arity: usize) -> Option<&'static CatalogEntry> {
        self.candidates(msg_id).find(|e| e.arity() == arity)
    }

    /// A new catalog without the given message ids. Used to keep ids out of
    /// automatic decoding when they are ambiguous with another variant.
    pub fn remove_entries(&self, msg_ids: &[u8]) -> Catalog {
        Catalog::new(
            self.entries
                .iter()
                .copied()
                .filter(|e| !msg_ids.contains(&e.msg_id)),
        )
    }

    /// A new catalog holding the entries of both catalogs. Entries of `other`
    /// whose name is already present are skipped.
    pub fn merge(&self, other: &Catalog) -> Catalog {
        Catalog::new(
            self.entries().chain(
                other
                    .entries()
                    .filter(|e| !self.by_name.contains_key(e.name)),
            ),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_by_name_and_id() {
        let catalog = Catalog::functions();
        let entry = catalog.lookup_name("SetChannelPeriod").unwrap();
        assert_eq!(entry.msg_id, 0x43);
        assert_eq!(entry.width(), 3);
        assert_eq!(catalog.lookup_id(0x4A).unwrap().name, "ResetSystem");
        assert!(catalog.lookup_id(0x00).is_none());
        assert!(catalog.lookup_name("NoSuchMessage").is_none());
    }

    #[test]
    fn names_are_unique_in_static_tables() {
        assert_eq!(Catalog::functions().len(), ANT_ALL_FUNCTIONS.len());
        assert_eq!(Catalog::callbacks().len(), ANT_ALL_CALLBACKS.len());
    }

    #[test]
    #[should_panic(expected = "duplicate catalog entry name")]
    fn duplicate_names_panic() {
        static DUPLICATE: [CatalogEntry; 2] = [
            CatalogEntry::new("Same", 0x01, &[]),
            CatalogEntry::new("Same", 0x02, &[]),
        ];
        Catalog::new(DUPLICATE.iter());
    }

    #[test]
    fn shared_id_resolves_by_length() {
        let catalog = Catalog::functions();
        assert_eq!(catalog.resolve(0x42, 3).unwrap().name, "AssignChannel");
        assert_eq!(catalog.resolve(0x42, 4).unwrap().name, "AssignChannelExtended");
        // Longer than any layout: widest fitting layout, rest is extended data.
        assert_eq!(catalog.resolve(0x42, 7).unwrap().name, "AssignChannelExtended");
        assert!(catalog.resolve(0x42, 2).is_none());
        assert_eq!(catalog.resolve_arity(0x42, 3).unwrap().name, "AssignChannel");
        assert_eq!(catalog.resolve_arity(0x42, 4).unwrap().name, "AssignChannelExtended");
    }

    #[test]
    fn remove_entries_leaves_original_untouched() {
        let catalog = Catalog::functions();
        let masked = catalog.remove_entries(&[0x42, 0x4A]);
        assert!(masked.lookup_id(0x42).is_none());
        assert!(masked.lookup_name("ResetSystem").is_none());
        assert_eq!(masked.len(), catalog.len() - 3);
        assert_eq!(catalog.lookup_id(0x4A).unwrap().name, "ResetSystem");
    }

    #[test]
    fn merge_keeps_first_entry_per_name() {
        let functions = Catalog::functions();
        let merged = functions.merge(Catalog::callbacks());
        assert_eq!(merged.lookup_name("ResetSystem").unwrap().msg_id, 0x4A);
        assert_eq!(merged.lookup_name("StartupMessage").unwrap().msg_id, 0x6F);
        assert_eq!(functions.merge(functions).len(), functions.len());
    }

    #[test]
    fn pad_fields_take_no_argument() {
        let entry = Catalog::functions().lookup_name("SetCwTestMode").unwrap();
        assert_eq!(entry.width(), 3);
        assert_eq!(entry.arity(), 2);
        let reset = Catalog::functions().lookup_name("ResetSystem").unwrap();
        assert_eq!(reset.width(), 1);
        assert_eq!(reset.arity(), 0);
    }
}
