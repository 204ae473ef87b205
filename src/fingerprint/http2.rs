//! HTTP/2 fingerprint configuration (SETTINGS, WINDOW_UPDATE, priorities).
//!
//! Akamai-style fingerprint: `settings|window_update|priority|pseudo_headers`.

/// Initial connection window every HTTP/2 peer starts with.
pub const DEFAULT_CONNECTION_WINDOW: u32 = 65_535;

/// Chrome's connection-level WINDOW_UPDATE increment.
pub const CHROME_CONNECTION_FLOW: u32 = 15_663_105;

/// Firefox's connection-level WINDOW_UPDATE increment.
pub const FIREFOX_CONNECTION_FLOW: u32 = 12_517_377;

/// Stream dependency and weight, as carried by PRIORITY and HEADERS frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityParam {
    pub stream_dependency: u32,
    pub exclusive: bool,
    /// Wire value; the effective weight is `weight + 1`.
    pub weight: u8,
}

impl PriorityParam {
    pub const fn new(stream_dependency: u32, exclusive: bool, weight: u8) -> Self {
        Self {
            stream_dependency,
            exclusive,
            weight,
        }
    }
}

/// A standalone PRIORITY frame sent right after the connection preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityFrame {
    pub stream_id: u32,
    pub priority: PriorityParam,
}

impl PriorityFrame {
    pub const fn new(stream_id: u32, stream_dependency: u32, weight: u8) -> Self {
        Self {
            stream_id,
            priority: PriorityParam::new(stream_dependency, false, weight),
        }
    }
}

/// HTTP/2 SETTINGS and flow-control layout.
///
/// A zero value means "do not send this setting".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http2Settings {
    pub header_table_size: u32,
    /// `None` leaves SETTINGS_ENABLE_PUSH to the engine default.
    pub enable_push: Option<bool>,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
    /// Connection-level WINDOW_UPDATE increment sent after SETTINGS.
    pub connection_flow: u32,
    /// Priority stamped on every request HEADERS frame.
    pub priority: Option<PriorityParam>,
    /// PRIORITY frames sent once, right after SETTINGS.
    pub priority_frames: Vec<PriorityFrame>,
}

impl Default for Http2Settings {
    fn default() -> Self {
        Self::chrome()
    }
}

impl Http2Settings {
    /// Settings that leave every value to the HTTP/2 engine.
    pub fn engine_defaults() -> Self {
        Self {
            header_table_size: 0,
            enable_push: None,
            max_concurrent_streams: 0,
            initial_window_size: 0,
            max_frame_size: 0,
            max_header_list_size: 0,
            connection_flow: 0,
            priority: None,
            priority_frames: Vec::new(),
        }
    }

    /// Chrome: `1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p`.
    pub fn chrome() -> Self {
        Self {
            header_table_size: 65_536,
            enable_push: Some(false),
            max_concurrent_streams: 0,
            initial_window_size: 6_291_456,
            max_frame_size: 0,
            max_header_list_size: 262_144,
            connection_flow: CHROME_CONNECTION_FLOW,
            priority: Some(PriorityParam::new(0, true, 255)),
            priority_frames: Vec::new(),
        }
    }

    /// Firefox: `1:65536;4:131072;5:16384|12517377|3:0:0:201,...|m,p,a,s`.
    pub fn firefox() -> Self {
        Self {
            header_table_size: 65_536,
            enable_push: None,
            max_concurrent_streams: 0,
            initial_window_size: 131_072,
            max_frame_size: 16_384,
            max_header_list_size: 0,
            connection_flow: FIREFOX_CONNECTION_FLOW,
            priority: Some(PriorityParam::new(13, false, 41)),
            priority_frames: vec![
                PriorityFrame::new(3, 0, 200),
                PriorityFrame::new(5, 0, 100),
                PriorityFrame::new(7, 0, 0),
                PriorityFrame::new(9, 7, 0),
                PriorityFrame::new(11, 3, 0),
                PriorityFrame::new(13, 0, 240),
            ],
        }
    }

    /// Total connection receive window the engine should advertise.
    pub fn connection_window(&self) -> Option<u32> {
        if self.connection_flow == 0 {
            return None;
        }
        Some(DEFAULT_CONNECTION_WINDOW.saturating_add(self.connection_flow))
    }

    /// SETTINGS_MAX_FRAME_SIZE if it lies in the legal range.
    pub fn valid_max_frame_size(&self) -> Option<u32> {
        match self.max_frame_size {
            16_384..=16_777_215 => Some(self.max_frame_size),
            _ => None,
        }
    }

    /// Whether the frame shaper has anything to add to the engine's output.
    pub fn shapes_frames(&self) -> bool {
        self.priority.is_some() || !self.priority_frames.is_empty()
    }
}
