//! Reads and writes Homeworld `.big` archives: HW1, HW1-Classic, HW2,
//! HW2-Classic (byte-identical to HW2) and HWRM (HW2 wrapped in Gearbox
//! encryption).

pub(crate) mod bin;
mod bitio;
mod detect;
mod error;
mod gbx_crypt;
mod hw1;
mod hw2;
mod hwrm;
mod lzss;
mod member;
mod util;

pub use crate::bin::DataSource;
pub use crate::detect::{open, AnyBig};
pub use crate::error::{BigError, Result};
pub use crate::hw1::{
    write as write_hw1, Hw1ClassicTocEntry, Hw1MemberSource, Hw1Reader, Hw1TocEntry, TocEntry,
    CLASSIC_UNKNOWN1_DEFAULT,
};
pub use crate::hw2::{
    write as write_hw2, ExtractOptions, Hw2FolderSource, Hw2MemberSource, Hw2Reader,
};
pub use crate::hwrm::HwrmReader;
pub use crate::member::{denormalize, normalize, Format, Member};

pub mod gearbox {
    //! Public surface for the `decrypt` CLI command: parse a Gearbox footer
    //! and stream out the plaintext body without interpreting it as HW2.
    pub use crate::gbx_crypt::{load_footer, Footer, GearboxCipher, ENCRYPTION_KEY_MARKER};
    pub use crate::hwrm::master_key;
}
