//! Read-only lookup tables consulted while decoding and displaying.
//!
//! The tables themselves live outside the core; the decoder only needs these
//! two queries. [`crate::defaults::BuiltinTables`] is a small compiled-in set.

/// Bluetooth SIG company identifier → company name.
pub trait ManufacturerNames {
    fn manufacturer_name(&self, id: u16) -> Option<&str>;
}

/// MAC OUI (first three address bytes) → vendor name.
pub trait OuiVendors {
    fn vendor(&self, oui: [u8; 3]) -> Option<&str>;
}

/// A table that knows nothing. Every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl ManufacturerNames for NoLookup {
    fn manufacturer_name(&self, _id: u16) -> Option<&str> {
        None
    }
}

impl OuiVendors for NoLookup {
    fn vendor(&self, _oui: [u8; 3]) -> Option<&str> {
        None
    }
}
