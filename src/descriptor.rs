//! DVB descriptor loop parsing (ETSI EN 300 468 §6), generalized from the
//! teacher's ARIB-flavored `psi::descriptor` to the full tag set spec §4.4
//! dispatches on: short/extended event, content, parental rating, PDC,
//! time-shifted event, linkage and component.

use anyhow::{bail, Error, Result};

use crate::check_len;

#[derive(Debug)]
pub enum Descriptor<'a> {
    ShortEvent(ShortEventDescriptor<'a>),
    ExtendedEvent(ExtendedEventDescriptor<'a>),
    Content(ContentDescriptor),
    ParentalRating(ParentalRatingDescriptor),
    Pdc(PdcDescriptor),
    TimeShiftedEvent(TimeShiftedEventDescriptor),
    Linkage(LinkageDescriptor<'a>),
    Component(ComponentDescriptor<'a>),
    StreamIdentifier(StreamIdentifierDescriptor),
    Unsupported(UnsupportedDescriptor<'a>),
}

impl<'a> Descriptor<'a> {
    pub fn parse(bytes: &[u8]) -> Result<(Descriptor<'_>, usize), Error> {
        check_len!(bytes.len(), 2);
        let descriptor_tag = bytes[0];
        let descriptor_length = usize::from(bytes[1]);
        check_len!(bytes.len(), 2 + descriptor_length);
        let descriptor = match descriptor_tag {
            0x4d => Descriptor::ShortEvent(ShortEventDescriptor::parse(bytes)?),
            0x4e => Descriptor::ExtendedEvent(ExtendedEventDescriptor::parse(bytes)?),
            0x4f => Descriptor::TimeShiftedEvent(TimeShiftedEventDescriptor::parse(bytes)?),
            0x4a => Descriptor::Linkage(LinkageDescriptor::parse(bytes)?),
            0x50 => Descriptor::Component(ComponentDescriptor::parse(bytes)?),
            0x52 => Descriptor::StreamIdentifier(StreamIdentifierDescriptor::parse(bytes)?),
            0x54 => Descriptor::Content(ContentDescriptor::parse(bytes)?),
            0x55 => Descriptor::ParentalRating(ParentalRatingDescriptor::parse(bytes)?),
            0x69 => Descriptor::Pdc(PdcDescriptor::parse(bytes)?),
            _ => Descriptor::Unsupported(UnsupportedDescriptor::parse(bytes)?),
        };
        Ok((descriptor, descriptor_length + 2))
    }
}

#[derive(Debug)]
pub struct ShortEventDescriptor<'a> {
    pub language_code: [u8; 3],
    pub event_name: &'a [u8],
    pub text: &'a [u8],
}

impl<'a> ShortEventDescriptor<'a> {
    fn parse(bytes: &[u8]) -> Result<ShortEventDescriptor<'_>, Error> {
        check_len!(bytes.len(), 6);
        let mut language_code = [0u8; 3];
        language_code.copy_from_slice(&bytes[2..5]);
        let event_name_length = usize::from(bytes[5]);
        check_len!(bytes.len(), 6 + event_name_length + 1);
        let event_name = &bytes[6..6 + event_name_length];
        let rest = &bytes[6 + event_name_length..];
        let text_length = usize::from(rest[0]);
        check_len!(rest.len(), 1 + text_length);
        let text = &rest[1..1 + text_length];
        Ok(ShortEventDescriptor {
            language_code,
            event_name,
            text,
        })
    }
}

#[derive(Debug)]
pub struct ExtendedEventDescriptorItem<'a> {
    pub item_description: &'a [u8],
    pub item: &'a [u8],
}

impl ExtendedEventDescriptorItem<'_> {
    fn parse(bytes: &[u8]) -> Result<(ExtendedEventDescriptorItem<'_>, usize), Error> {
        check_len!(bytes.len(), 1);
        let item_description_length = usize::from(bytes[0]);
        check_len!(bytes.len(), 1 + item_description_length + 1);
        let item_description = &bytes[1..1 + item_description_length];
        let rest = &bytes[1 + item_description_length..];
        let item_length = usize::from(rest[0]);
        check_len!(rest.len(), 1 + item_length);
        let item = &rest[1..1 + item_length];
        Ok((
            ExtendedEventDescriptorItem {
                item_description,
                item,
            },
            2 + item_description_length + item_length,
        ))
    }
}

#[derive(Debug)]
pub struct ExtendedEventDescriptor<'a> {
    pub descriptor_number: u8,
    pub last_descriptor_number: u8,
    pub language_code: [u8; 3],
    pub items: Vec<ExtendedEventDescriptorItem<'a>>,
    pub text: &'a [u8],
}

impl<'a> ExtendedEventDescriptor<'a> {
    fn parse(bytes: &[u8]) -> Result<ExtendedEventDescriptor<'_>, Error> {
        check_len!(bytes.len(), 7);
        let descriptor_number = bytes[2] >> 4;
        let last_descriptor_number = bytes[2] & 0xf;
        let mut language_code = [0u8; 3];
        language_code.copy_from_slice(&bytes[3..6]);
        let length_of_items = usize::from(bytes[6]);
        check_len!(bytes.len(), 7 + length_of_items + 1);
        let mut items = Vec::new();
        {
            let mut bytes = &bytes[7..7 + length_of_items];
            while !bytes.is_empty() {
                let (item, n) = ExtendedEventDescriptorItem::parse(bytes)?;
                items.push(item);
                bytes = &bytes[n..];
            }
        }
        let rest = &bytes[7 + length_of_items..];
        let text_length = usize::from(rest[0]);
        check_len!(rest.len(), 1 + text_length);
        let text = &rest[1..1 + text_length];
        Ok(ExtendedEventDescriptor {
            descriptor_number,
            last_descriptor_number,
            language_code,
            items,
            text,
        })
    }
}

/// One `content_nibble_level_1`/`content_nibble_level_2`/`user_byte` row.
#[derive(Debug, Clone, Copy)]
pub struct ContentItem {
    pub nibble_level_1: u8,
    pub nibble_level_2: u8,
    pub user_byte: u8,
}

impl ContentItem {
    /// Packs the two genre nibbles the way the handler-facing `contents` byte
    /// array stores them: `(nibble1 << 4) | nibble2`.
    pub fn packed(&self) -> u8 {
        (self.nibble_level_1 << 4) | self.nibble_level_2
    }
}

#[derive(Debug)]
pub struct ContentDescriptor {
    pub items: Vec<ContentItem>,
}

impl ContentDescriptor {
    fn parse(bytes: &[u8]) -> Result<ContentDescriptor, Error> {
        let length = usize::from(bytes[1]);
        let mut bytes = &bytes[2..2 + length];
        let mut items = Vec::new();
        while !bytes.is_empty() {
            check_len!(bytes.len(), 2);
            items.push(ContentItem {
                nibble_level_1: bytes[0] >> 4,
                nibble_level_2: bytes[0] & 0xf,
                user_byte: bytes[1],
            });
            bytes = &bytes[2..];
        }
        Ok(ContentDescriptor { items })
    }
}

/// One `parental_rating_descriptor` row. `rating` is the raw wire byte;
/// the minimum-age mapping from spec §4.4 lives in
/// [`crate::model::ParentalRating`]'s construction in the processor, not here.
#[derive(Debug, Clone, Copy)]
pub struct ParentalRatingItem {
    pub country_code: [u8; 3],
    pub rating: u8,
}

#[derive(Debug)]
pub struct ParentalRatingDescriptor {
    pub items: Vec<ParentalRatingItem>,
}

impl ParentalRatingDescriptor {
    fn parse(bytes: &[u8]) -> Result<ParentalRatingDescriptor, Error> {
        let length = usize::from(bytes[1]);
        let mut bytes = &bytes[2..2 + length];
        let mut items = Vec::new();
        while !bytes.is_empty() {
            check_len!(bytes.len(), 4);
            let mut country_code = [0u8; 3];
            country_code.copy_from_slice(&bytes[0..3]);
            items.push(ParentalRatingItem {
                country_code,
                rating: bytes[3],
            });
            bytes = &bytes[4..];
        }
        Ok(ParentalRatingDescriptor { items })
    }
}

/// `PDC_descriptor`: a 24-bit `programme_identification_label` packing
/// reserved(4)/day(5)/month(4)/hour(5)/minute(6).
#[derive(Debug)]
pub struct PdcDescriptor {
    pub day: u32,
    pub month: u32,
    pub hour: u32,
    pub minute: u32,
}

impl PdcDescriptor {
    fn parse(bytes: &[u8]) -> Result<PdcDescriptor, Error> {
        check_len!(bytes.len(), 5);
        let pil = (u32::from(bytes[2]) << 16) | (u32::from(bytes[3]) << 8) | u32::from(bytes[4]);
        let day = (pil >> 15) & 0x1f;
        let month = (pil >> 11) & 0xf;
        let hour = (pil >> 6) & 0x1f;
        let minute = pil & 0x3f;
        if day == 0 || month == 0 {
            bail!("zero day/month in PDC label: {:#x}", pil);
        }
        Ok(PdcDescriptor {
            day,
            month,
            hour,
            minute,
        })
    }
}

#[derive(Debug)]
pub struct TimeShiftedEventDescriptor {
    pub reference_service_id: u16,
    pub reference_event_id: u16,
}

impl TimeShiftedEventDescriptor {
    fn parse(bytes: &[u8]) -> Result<TimeShiftedEventDescriptor, Error> {
        check_len!(bytes.len(), 6);
        Ok(TimeShiftedEventDescriptor {
            reference_service_id: (u16::from(bytes[2]) << 8) | u16::from(bytes[3]),
            reference_event_id: (u16::from(bytes[4]) << 8) | u16::from(bytes[5]),
        })
    }
}

#[derive(Debug)]
pub struct LinkageDescriptor<'a> {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub service_id: u16,
    pub linkage_type: u8,
    pub private_data: &'a [u8],
}

impl<'a> LinkageDescriptor<'a> {
    fn parse(bytes: &[u8]) -> Result<LinkageDescriptor<'_>, Error> {
        check_len!(bytes.len(), 9);
        let length = usize::from(bytes[1]);
        check_len!(length, 7);
        Ok(LinkageDescriptor {
            transport_stream_id: (u16::from(bytes[2]) << 8) | u16::from(bytes[3]),
            original_network_id: (u16::from(bytes[4]) << 8) | u16::from(bytes[5]),
            service_id: (u16::from(bytes[6]) << 8) | u16::from(bytes[7]),
            linkage_type: bytes[8],
            private_data: &bytes[9..2 + length],
        })
    }
}

#[derive(Debug)]
pub struct ComponentDescriptor<'a> {
    pub stream_content: u8,
    pub stream_content_ext: u8,
    pub component_type: u8,
    pub component_tag: u8,
    pub language_code: [u8; 3],
    pub text: &'a [u8],
}

impl<'a> ComponentDescriptor<'a> {
    fn parse(bytes: &[u8]) -> Result<ComponentDescriptor<'_>, Error> {
        check_len!(bytes.len(), 8);
        let length = usize::from(bytes[1]);
        check_len!(length, 6);
        let mut language_code = [0u8; 3];
        language_code.copy_from_slice(&bytes[5..8]);
        Ok(ComponentDescriptor {
            stream_content_ext: bytes[2] >> 4,
            stream_content: bytes[2] & 0xf,
            component_type: bytes[3],
            component_tag: bytes[4],
            language_code,
            text: &bytes[8..2 + length],
        })
    }
}

#[derive(Debug)]
pub struct StreamIdentifierDescriptor {
    pub component_tag: u8,
}

impl StreamIdentifierDescriptor {
    fn parse(bytes: &[u8]) -> Result<StreamIdentifierDescriptor, Error> {
        check_len!(bytes.len(), 3);
        Ok(StreamIdentifierDescriptor {
            component_tag: bytes[2],
        })
    }
}

#[derive(Debug)]
pub struct UnsupportedDescriptor<'a> {
    pub descriptor_tag: u8,
    pub data: &'a [u8],
}

impl<'a> UnsupportedDescriptor<'a> {
    fn parse(bytes: &[u8]) -> Result<UnsupportedDescriptor<'_>, Error> {
        let length = usize::from(bytes[1]);
        Ok(UnsupportedDescriptor {
            descriptor_tag: bytes[0],
            data: &bytes[2..2 + length],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_content_nibbles() {
        let item = ContentItem {
            nibble_level_1: 0x3,
            nibble_level_2: 0x1,
            user_byte: 0x00,
        };
        assert_eq!(item.packed(), 0x31);
    }

    #[test]
    fn parses_short_event_descriptor() {
        let bytes = [0x4d, 0x09, b'e', b'n', b'g', 2, b'h', b'i', 1, b'x'];
        let (d, size) = Descriptor::parse(&bytes).unwrap();
        assert_eq!(size, 11);
        match d {
            Descriptor::ShortEvent(s) => {
                assert_eq!(&s.language_code, b"eng");
                assert_eq!(s.event_name, b"hi");
                assert_eq!(s.text, b"x");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_pdc_descriptor() {
        // day=5, month=1, hour=23, minute=30 packed into the 24-bit label.
        let pil: u32 = (5 << 15) | (1 << 11) | (23 << 6) | 30;
        let bytes = [
            0x69,
            0x03,
            ((pil >> 16) & 0xff) as u8,
            ((pil >> 8) & 0xff) as u8,
            (pil & 0xff) as u8,
        ];
        let (d, _) = Descriptor::parse(&bytes).unwrap();
        match d {
            Descriptor::Pdc(p) => {
                assert_eq!((p.day, p.month, p.hour, p.minute), (5, 1, 23, 30));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unsupported_tag_falls_through() {
        let bytes = [0xaa, 0x02, 0x01, 0x02];
        let (d, size) = Descriptor::parse(&bytes).unwrap();
        assert_eq!(size, 4);
        assert!(matches!(d, Descriptor::Unsupported(_)));
    }
}
