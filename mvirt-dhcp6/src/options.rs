//! DHCPv6 option helpers on top of the dhcproto v6 types.
//!
//! Client FQDN (39), Boot File URL (59) and Client Architecture (61) have no
//! typed variant and travel as [`UnknownOption`]s.

use dhcproto::error::{DecodeError, DecodeResult, EncodeResult};
use dhcproto::v6::{DhcpOption, Message, ORO, OptionCode, UnknownOption};
use dhcproto::{Decodable, Decoder, Encodable, Encoder, Name, NameError};

/// Enterprise number carried in the Vendor Class option.
pub const VENDOR_ENTERPRISE_NUMBER: u32 = 10;
pub const VENDOR_CLASS_DATA: &[u8] = b"HTTPClient";

/// Client architecture types (RFC 4578 / IANA registry) that boot via UEFI.
const EFI_ARCH_TYPES: &[u16] = &[6, 7, 9, 10, 11, 16, 18, 19];

/// Shortest payload dhcproto can decode for options with fixed fields.
fn min_len(code: OptionCode) -> usize {
    match code {
        OptionCode::StatusCode => 2,
        OptionCode::VendorClass | OptionCode::VendorOpts => 4,
        _ => 0,
    }
}

/// Decode a client message, rejecting anything that is not cleanly framed.
///
/// dhcproto stops at the first option it cannot read and keeps the rest of
/// the message. Here every option record must decode on its own, consume
/// exactly its length, and the records must fill the datagram.
pub fn decode_message(datagram: &[u8]) -> DecodeResult<Message> {
    let mut dec = Decoder::new(datagram);
    dec.read_u8()?;
    dec.read::<3>()?;

    while !dec.buffer().is_empty() {
        let record = &datagram[datagram.len() - dec.buffer().len()..];
        let code = dec.read_u16()?;
        let len = usize::from(dec.read_u16()?);
        dec.read_slice(len)?;

        if len < min_len(code.into()) {
            return Err(DecodeError::InvalidData(code.into(), "option too short"));
        }
        let mut one = Decoder::new(&record[..4 + len]);
        DhcpOption::decode(&mut one)?;
        if !one.buffer().is_empty() {
            return Err(DecodeError::InvalidData(
                code.into(),
                "option length mismatch",
            ));
        }
    }

    Message::decode(&mut Decoder::new(datagram))
}

pub fn has_rapid_commit(msg: &Message) -> bool {
    msg.opts().get(OptionCode::RapidCommit).is_some()
}

/// Option codes listed in the Option Request Option, in client order.
pub fn requested_options(msg: &Message) -> Vec<OptionCode> {
    match msg.opts().get(OptionCode::ORO) {
        Some(DhcpOption::ORO(ORO { opts })) => opts.clone(),
        _ => Vec::new(),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Network-boot hints announced by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientHints {
    /// User Class contains "iPXE".
    pub ipxe: bool,
    /// UEFI architecture type, or "EFI" in the User Class.
    pub efi: bool,
}

impl ClientHints {
    pub fn from_message(msg: &Message) -> Self {
        let classes: &[Vec<u8>] = match msg.opts().get(OptionCode::UserClass) {
            Some(DhcpOption::UserClass(class)) => &class.data,
            _ => &[],
        };
        let ipxe = classes.iter().any(|c| contains(c, b"iPXE"));
        let efi_class = classes.iter().any(|c| contains(c, b"EFI"));

        let efi_arch = match msg.opts().get(OptionCode::ClientArchType) {
            Some(DhcpOption::Unknown(arch)) => arch
                .data()
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .any(|arch| EFI_ARCH_TYPES.contains(&arch)),
            _ => false,
        };

        ClientHints {
            ipxe,
            efi: efi_arch || efi_class,
        }
    }
}

pub fn boot_file_url(url: &str) -> DhcpOption {
    DhcpOption::Unknown(UnknownOption::new(
        OptionCode::OptBootfileUrl,
        url.as_bytes().to_vec(),
    ))
}

/// Vendor Class `10 / "HTTPClient"`.
///
/// Encoded by hand: dhcproto writes the item count as the option length.
pub fn vendor_class() -> DhcpOption {
    let mut data = Vec::with_capacity(6 + VENDOR_CLASS_DATA.len());
    data.extend_from_slice(&VENDOR_ENTERPRISE_NUMBER.to_be_bytes());
    data.extend_from_slice(&(VENDOR_CLASS_DATA.len() as u16).to_be_bytes());
    data.extend_from_slice(VENDOR_CLASS_DATA);
    DhcpOption::Unknown(UnknownOption::new(OptionCode::VendorClass, data))
}

/// Parse a dotted domain. The empty string is the root.
pub fn domain_name(domain: &str) -> Result<Name, NameError> {
    if domain.is_empty() {
        Ok(Name::root())
    } else {
        Name::from_ascii(domain)
    }
}

/// RFC 1035 wire format of `name`, root-terminated and uncompressed.
fn name_wire(name: Name) -> EncodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    DhcpOption::DomainSearchList(vec![name]).encode(&mut Encoder::new(&mut buf))?;
    // code and length
    Ok(buf.split_off(4))
}

/// Client FQDN with the flags byte cleared, naming `host.domain`.
pub fn client_fqdn(host: &str, domain: &str) -> EncodeResult<DhcpOption> {
    let fqdn = if domain.is_empty() {
        domain_name(host)?
    } else {
        domain_name(&format!("{host}.{domain}"))?
    };
    let mut data = vec![0u8];
    data.extend(name_wire(fqdn)?);
    Ok(DhcpOption::Unknown(UnknownOption::new(
        OptionCode::ClientFqdn,
        data,
    )))
}

pub fn domain_search_list(domain: &str) -> Result<DhcpOption, NameError> {
    Ok(DhcpOption::DomainSearchList(vec![domain_name(domain)?]))
}
