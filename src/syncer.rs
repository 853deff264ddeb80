//! Per-section version/completion tracking (spec §4.1). A `SectionSyncer`
//! remembers, for one (service, table) pair, which section numbers have been
//! seen under the current version: it lets the processor skip sections it has
//! already applied, and tell when a table segment is fully assembled.

/// 256-bit seen bitmap, one bit per possible `section_number`.
const BITMAP_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct SectionSyncer {
    version: Option<u8>,
    seen: [u8; BITMAP_BYTES],
    last_section_number: u8,
}

impl Default for SectionSyncer {
    fn default() -> Self {
        SectionSyncer {
            version: None,
            seen: [0u8; BITMAP_BYTES],
            last_section_number: 0,
        }
    }
}

impl SectionSyncer {
    pub fn new() -> Self {
        Self::default()
    }

    fn bit(&self, section_number: u8) -> bool {
        let byte = self.seen[(section_number / 8) as usize];
        (byte >> (section_number % 8)) & 1 == 1
    }

    fn set_bit(&mut self, section_number: u8) {
        self.seen[(section_number / 8) as usize] |= 1 << (section_number % 8);
    }

    /// True if this (version, section_number) pair was already recorded by
    /// [`SectionSyncer::mark_processed`]; a table-version bump invalidates
    /// everything previously seen.
    pub fn already_processed(&self, version: u8, section_number: u8) -> bool {
        self.version == Some(version) && self.bit(section_number)
    }

    /// Records a section as applied. Resets the bitmap when the version
    /// differs from the one currently tracked.
    pub fn mark_processed(&mut self, version: u8, section_number: u8, last_section_number: u8) {
        if self.version != Some(version) {
            self.seen = [0u8; BITMAP_BYTES];
            self.version = Some(version);
        }
        self.last_section_number = last_section_number;
        self.set_bit(section_number);
    }

    /// True once every section number from 0 to `last_section_number` has
    /// been marked under the current version.
    pub fn complete(&self) -> bool {
        match self.version {
            None => false,
            Some(_) => (0..=self.last_section_number).all(|n| self.bit(n)),
        }
    }

    pub fn version(&self) -> Option<u8> {
        self.version
    }
}
