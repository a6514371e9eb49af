//! MySQL wire protocol implementation.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum packet payload is 2^24 - 1 (16MB - 1). Larger payloads
//! are split into multiple packets, and a payload that is an exact
//! multiple of the maximum is terminated by an empty packet.

pub mod prepared;
pub mod reader;
pub mod writer;

pub use prepared::{
    StmtPrepareOk, build_send_long_data_packet, build_stmt_close_packet,
    build_stmt_execute_packet, build_stmt_prepare_packet, build_stmt_reset_packet,
    parse_stmt_prepare_ok,
};
pub use reader::PacketReader;
pub use writer::PacketWriter;

/// Maximum payload size for a single MySQL packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// Most columns a result set or table may have.
pub const MAX_COLUMNS: usize = 4096;

/// Header, affected rows, last insert id, status flags and warnings.
pub const MIN_OK_PACKET_LEN: usize = 7;

/// MySQL capability flags (client and server).
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities requested on every connection; the rest depend on configuration.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_DEPRECATE_EOF;
}

/// MySQL command codes (COM_xxx) issued by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Quit connection
    Quit = 0x01,
    /// Text protocol query
    Query = 0x03,
    /// Ping server
    Ping = 0x0e,
    /// Prepare statement
    StmtPrepare = 0x16,
    /// Execute prepared statement
    StmtExecute = 0x17,
    /// Send long data for prepared statement
    StmtSendLongData = 0x18,
    /// Close prepared statement
    StmtClose = 0x19,
    /// Reset prepared statement
    StmtReset = 0x1a,
}

/// MySQL server status flags.
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 0x0200;
}

/// MySQL collations and the character sets they belong to.
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;

    /// Collation sent in the handshake unless configured otherwise.
    pub const DEFAULT_COLLATION: &str = "utf8mb4_general_ci";

    /// Known collation names and their ids.
    pub const COLLATIONS: &[(&str, u8)] = &[
        ("big5_chinese_ci", 1),
        ("latin2_czech_cs", 2),
        ("dec8_swedish_ci", 3),
        ("cp850_general_ci", 4),
        ("latin1_german1_ci", 5),
        ("hp8_english_ci", 6),
        ("koi8r_general_ci", 7),
        ("latin1_swedish_ci", 8),
        ("latin2_general_ci", 9),
        ("swe7_swedish_ci", 10),
        ("ascii_general_ci", 11),
        ("ujis_japanese_ci", 12),
        ("sjis_japanese_ci", 13),
        ("cp1251_bulgarian_ci", 14),
        ("latin1_danish_ci", 15),
        ("hebrew_general_ci", 16),
        ("tis620_thai_ci", 18),
        ("euckr_korean_ci", 19),
        ("latin7_estonian_cs", 20),
        ("latin2_hungarian_ci", 21),
        ("koi8u_general_ci", 22),
        ("cp1251_ukrainian_ci", 23),
        ("gb2312_chinese_ci", 24),
        ("greek_general_ci", 25),
        ("cp1250_general_ci", 26),
        ("latin2_croatian_ci", 27),
        ("gbk_chinese_ci", 28),
        ("cp1257_lithuanian_ci", 29),
        ("latin5_turkish_ci", 30),
        ("latin1_german2_ci", 31),
        ("armscii8_general_ci", 32),
        ("utf8_general_ci", 33),
        ("cp1250_czech_cs", 34),
        ("ucs2_general_ci", 35),
        ("cp866_general_ci", 36),
        ("keybcs2_general_ci", 37),
        ("macce_general_ci", 38),
        ("macroman_general_ci", 39),
        ("cp852_general_ci", 40),
        ("latin7_general_ci", 41),
        ("latin7_general_cs", 42),
        ("macce_bin", 43),
        ("cp1250_croatian_ci", 44),
        ("utf8mb4_general_ci", 45),
        ("utf8mb4_bin", 46),
        ("latin1_bin", 47),
        ("latin1_general_ci", 48),
        ("latin1_general_cs", 49),
        ("cp1251_bin", 50),
        ("cp1251_general_ci", 51),
        ("cp1251_general_cs", 52),
        ("macroman_bin", 53),
        ("utf16_general_ci", 54),
        ("utf16_bin", 55),
        ("utf16le_general_ci", 56),
        ("cp1256_general_ci", 57),
        ("cp1257_bin", 58),
        ("cp1257_general_ci", 59),
        ("utf32_general_ci", 60),
        ("utf32_bin", 61),
        ("utf16le_bin", 62),
        ("binary", 63),
        ("armscii8_bin", 64),
        ("ascii_bin", 65),
        ("cp1250_bin", 66),
        ("cp1256_bin", 67),
        ("cp866_bin", 68),
        ("dec8_bin", 69),
        ("greek_bin", 70),
        ("hebrew_bin", 71),
        ("hp8_bin", 72),
        ("keybcs2_bin", 73),
        ("koi8r_bin", 74),
        ("koi8u_bin", 75),
        ("utf8_tolower_ci", 76),
        ("latin2_bin", 77),
        ("latin5_bin", 78),
        ("latin7_bin", 79),
        ("cp850_bin", 80),
        ("cp852_bin", 81),
        ("swe7_bin", 82),
        ("utf8_bin", 83),
        ("big5_bin", 84),
        ("euckr_bin", 85),
        ("gb2312_bin", 86),
        ("gbk_bin", 87),
        ("sjis_bin", 88),
        ("tis620_bin", 89),
        ("ucs2_bin", 90),
        ("ujis_bin", 91),
        ("geostd8_general_ci", 92),
        ("geostd8_bin", 93),
        ("latin1_spanish_ci", 94),
        ("cp932_japanese_ci", 95),
        ("cp932_bin", 96),
        ("eucjpms_japanese_ci", 97),
        ("eucjpms_bin", 98),
        ("cp1250_polish_ci", 99),
        ("utf8_unicode_ci", 192),
        ("utf8_icelandic_ci", 193),
        ("utf8_latvian_ci", 194),
        ("utf8_romanian_ci", 195),
        ("utf8_slovenian_ci", 196),
        ("utf8_polish_ci", 197),
        ("utf8_estonian_ci", 198),
        ("utf8_spanish_ci", 199),
        ("utf8_swedish_ci", 200),
        ("utf8_turkish_ci", 201),
        ("utf8_czech_ci", 202),
        ("utf8_danish_ci", 203),
        ("utf8_unicode_520_ci", 214),
        ("utf8mb4_unicode_ci", 224),
        ("utf8mb4_icelandic_ci", 225),
        ("utf8mb4_latvian_ci", 226),
        ("utf8mb4_romanian_ci", 227),
        ("utf8mb4_slovenian_ci", 228),
        ("utf8mb4_polish_ci", 229),
        ("utf8mb4_estonian_ci", 230),
        ("utf8mb4_spanish_ci", 231),
        ("utf8mb4_swedish_ci", 232),
        ("utf8mb4_turkish_ci", 233),
        ("utf8mb4_czech_ci", 234),
        ("utf8mb4_danish_ci", 235),
        ("utf8mb4_unicode_520_ci", 246),
        ("gb18030_chinese_ci", 248),
        ("gb18030_bin", 249),
        ("gb18030_unicode_520_ci", 250),
        ("utf8mb4_0900_ai_ci", 255),
    ];

    /// Multi-byte charsets whose trailing bytes can be `0x5c` (backslash),
    /// which makes client-side escaping unsound.
    pub const ESCAPE_UNSAFE_CHARSETS: &[&str] = &["big5", "sjis", "gbk", "gb2312", "cp932", "gb18030"];

    /// Look up a collation id by name.
    pub fn collation_id(name: &str) -> Option<u8> {
        COLLATIONS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, id)| *id)
    }

    /// Look up a collation name by id.
    pub fn collation_name(id: u8) -> Option<&'static str> {
        COLLATIONS.iter().find(|(_, i)| *i == id).map(|(n, _)| *n)
    }

    /// The character set a collation belongs to.
    pub fn charset_of(collation: &str) -> &str {
        collation.split('_').next().unwrap_or(collation)
    }
}

/// A MySQL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    /// Parse a packet header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    /// Encode the header to 4 bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            ((self.payload_length >> 8) & 0xFF) as u8,
            ((self.payload_length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// Classification of a server packet by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// End of a row stream: EOF (0xFE, < 9 bytes), or an OK packet with a
    /// 0xFE header when CLIENT_DEPRECATE_EOF is in effect
    Eof,
    /// Local infile request (0xFB)
    LocalInfile,
    /// Anything else: a column count, column definition or row
    Data,
}

impl PacketType {
    /// Classify the first packet of a command response.
    ///
    /// A 0x00 packet too short to be an OK falls through to `Data`, where
    /// it reads as a column count of zero.
    pub fn from_first_byte(byte: u8, payload_len: usize) -> Self {
        match byte {
            0x00 if payload_len >= MIN_OK_PACKET_LEN => PacketType::Ok,
            0xFF => PacketType::Error,
            0xFE if payload_len < 9 => PacketType::Eof,
            0xFB => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }

    /// Classify a packet inside a row stream.
    ///
    /// A text row may legitimately start with 0xFB (a NULL first column) or
    /// 0x00 (an empty string), and a binary row always starts with 0x00, so
    /// only the terminator and ERR are recognized here.
    pub fn in_row_stream(payload: &[u8], deprecate_eof: bool) -> Self {
        match payload.first() {
            Some(0xFF) => PacketType::Error,
            Some(0xFE) if payload.len() < 9 => PacketType::Eof,
            Some(0xFE) if deprecate_eof && payload.len() < MAX_PACKET_SIZE => PacketType::Eof,
            _ => PacketType::Data,
        }
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    /// Number of affected rows
    pub affected_rows: u64,
    /// Last insert ID
    pub last_insert_id: u64,
    /// Server status flags
    pub status_flags: u16,
    /// Number of warnings
    pub warnings: u16,
    /// Info string (if any)
    pub info: String,
}

impl OkPacket {
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

/// Parsed EOF packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    /// Number of warnings
    pub warnings: u16,
    /// Server status flags
    pub status_flags: u16,
}

impl EofPacket {
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}
