// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Catalogue of supported devices and their memory maps.
//!
//! The tinyAVR 0/1 and megaAVR 0 families share every peripheral base
//! address; only the flash geometry varies by part. Selection is a pure
//! table lookup keyed by [`DeviceTag`].

use std::str::FromStr;

use crate::Error;

/// Memory map of one target device. All addresses are as seen through
/// UPDI's 16-bit data space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Device {
    pub flash_start: u16,
    pub flash_size: u32,
    /// Power of two, at most 256.
    pub flash_pagesize: u16,
    pub syscfg_addr: u16,
    pub nvmctrl_addr: u16,
    pub sigrow_addr: u16,
    pub fuses_addr: u16,
    pub userrow_addr: u16,
    pub num_fuses: u8,
}

const fn device(
    flash_start: u16,
    flash_size: u32,
    flash_pagesize: u16,
) -> Device {
    Device {
        flash_start,
        flash_size,
        flash_pagesize,
        syscfg_addr: 0x0F00,
        nvmctrl_addr: 0x1000,
        sigrow_addr: 0x1100,
        fuses_addr: 0x1280,
        userrow_addr: 0x1300,
        num_fuses: 11,
    }
}

macro_rules! catalogue {
    ($( $tag:ident, $name:literal => ($start:literal, $size:expr, $page:literal); )*) => {
        /// One supported part.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum DeviceTag {
            $( $tag, )*
        }

        impl DeviceTag {
            pub const ALL: &'static [DeviceTag] = &[
                $( DeviceTag::$tag, )*
            ];

            /// The lowercase part name, as accepted on the command line.
            pub fn name(self) -> &'static str {
                match self {
                    $( DeviceTag::$tag => $name, )*
                }
            }

            /// Memory map for this part.
            pub fn descriptor(self) -> Device {
                match self {
                    $( DeviceTag::$tag => device($start, $size, $page), )*
                }
            }
        }

        impl FromStr for DeviceTag {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                let lower = s.to_ascii_lowercase();
                match lower.as_str() {
                    $( $name => Ok(DeviceTag::$tag), )*
                    _ => Err(Error::BadConfig(format!(
                        "unknown device tag {s:?}"
                    ))),
                }
            }
        }
    };
}

catalogue! {
    Atmega4808, "atmega4808" => (0x4000, 48 * 1024, 128);
    Atmega4809, "atmega4809" => (0x4000, 48 * 1024, 128);
    Atmega3208, "atmega3208" => (0x4000, 32 * 1024, 128);
    Atmega3209, "atmega3209" => (0x4000, 32 * 1024, 128);
    Attiny3216, "attiny3216" => (0x8000, 32 * 1024, 128);
    Attiny3217, "attiny3217" => (0x8000, 32 * 1024, 128);
    Attiny1604, "attiny1604" => (0x8000, 16 * 1024, 64);
    Attiny1606, "attiny1606" => (0x8000, 16 * 1024, 64);
    Attiny1607, "attiny1607" => (0x8000, 16 * 1024, 64);
    Attiny1614, "attiny1614" => (0x8000, 16 * 1024, 64);
    Attiny1616, "attiny1616" => (0x8000, 16 * 1024, 64);
    Attiny1617, "attiny1617" => (0x8000, 16 * 1024, 64);
    Attiny804, "attiny804" => (0x8000, 8 * 1024, 64);
    Attiny806, "attiny806" => (0x8000, 8 * 1024, 64);
    Attiny807, "attiny807" => (0x8000, 8 * 1024, 64);
    Attiny814, "attiny814" => (0x8000, 8 * 1024, 64);
    Attiny816, "attiny816" => (0x8000, 8 * 1024, 64);
    Attiny817, "attiny817" => (0x8000, 8 * 1024, 64);
    Attiny402, "attiny402" => (0x8000, 4 * 1024, 64);
    Attiny404, "attiny404" => (0x8000, 4 * 1024, 64);
    Attiny406, "attiny406" => (0x8000, 4 * 1024, 64);
    Attiny412, "attiny412" => (0x8000, 4 * 1024, 64);
    Attiny414, "attiny414" => (0x8000, 4 * 1024, 64);
    Attiny416, "attiny416" => (0x8000, 4 * 1024, 64);
    Attiny417, "attiny417" => (0x8000, 4 * 1024, 64);
    Attiny202, "attiny202" => (0x8000, 2 * 1024, 64);
    Attiny204, "attiny204" => (0x8000, 2 * 1024, 64);
    Attiny212, "attiny212" => (0x8000, 2 * 1024, 64);
    Attiny214, "attiny214" => (0x8000, 2 * 1024, 64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_total() {
        for &tag in DeviceTag::ALL {
            let d = tag.descriptor();
            assert!(d.flash_pagesize.is_power_of_two());
            assert!(d.flash_pagesize <= 256);
            assert_eq!(d.num_fuses, 11);
            assert_eq!(tag.name().parse::<DeviceTag>().unwrap(), tag);
        }
    }

    #[test]
    fn families() {
        let mega = "atmega4809".parse::<DeviceTag>().unwrap().descriptor();
        assert_eq!(mega.flash_start, 0x4000);
        assert_eq!(mega.flash_size, 48 * 1024);
        assert_eq!(mega.flash_pagesize, 128);

        let tiny = "ATtiny412".parse::<DeviceTag>().unwrap().descriptor();
        assert_eq!(tiny.flash_start, 0x8000);
        assert_eq!(tiny.flash_size, 4 * 1024);
        assert_eq!(tiny.flash_pagesize, 64);
    }

    #[test]
    fn unknown_tag() {
        assert!(matches!(
            "atmega328p".parse::<DeviceTag>(),
            Err(Error::BadConfig(_))
        ));
    }
}
