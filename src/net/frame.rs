use crate::net::crypt::Crypt;
use crate::net::error::NetError;
use crate::version::Version;

/// Every client in the family uses a 0x7C00-byte receive buffer.
pub const MAX_FRAME_SIZE: usize = 0x7C00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCommand {
    pub command: u16,
    pub flag: u32,
    pub body: Vec<u8>,
}

fn parse_header(header: &[u8], version: Version) -> (u16, u32, usize) {
    if version.is_v4() {
        let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let command = u16::from_le_bytes([header[4], header[5]]);
        let flag = u16::from_le_bytes([header[6], header[7]]) as u32;
        (command, flag, size)
    } else if version.uses_pc_header() {
        let size = u16::from_le_bytes([header[0], header[1]]) as usize;
        (header[2] as u16, header[3] as u32, size)
    } else {
        let size = u16::from_le_bytes([header[2], header[3]]) as usize;
        (header[0] as u16, header[1] as u32, size)
    }
}

/// Pull one complete command off the front of `buf`, or return `None` when
/// too few bytes are buffered. The header is peeked and decrypted without
/// advancing the cipher; once the whole physical frame is present, the
/// entire frame is re-decrypted with advance so that plaintext-dependent
/// ciphers stay consistent.
pub fn read_one(
    buf: &mut Vec<u8>,
    version: Version,
    crypt_in: &mut Option<Crypt>,
) -> Result<Option<ReadCommand>, NetError> {
    let header_size = version.header_size();
    if buf.len() < header_size {
        return Ok(None);
    }

    let mut header = [0u8; 8];
    header[..header_size].copy_from_slice(&buf[..header_size]);
    if let Some(crypt) = crypt_in.as_mut() {
        crypt.decrypt(&mut header[..header_size], false)?;
    }

    let (command, flag, logical_size) = parse_header(&header[..header_size], version);
    if logical_size < header_size {
        return Err(NetError::Frame(format!(
            "frame size {:#x} is smaller than its header",
            logical_size
        )));
    }
    if logical_size > MAX_FRAME_SIZE {
        return Err(NetError::Frame(format!(
            "frame size {:#x} exceeds the {:#x} limit",
            logical_size, MAX_FRAME_SIZE
        )));
    }

    // Encrypted final-version frames are padded to 8 bytes on the wire; the
    // size field reports the unpadded logical length.
    let physical_size = if version.is_v4() && crypt_in.is_some() {
        (logical_size + 7) & !7
    } else {
        logical_size
    };
    if buf.len() < physical_size {
        return Ok(None);
    }

    let mut frame: Vec<u8> = buf.drain(..physical_size).collect();
    if let Some(crypt) = crypt_in.as_mut() {
        crypt.decrypt(&mut frame, true)?;
    }
    frame.truncate(logical_size);
    let body = frame.split_off(header_size);
    Ok(Some(ReadCommand {
        command,
        flag,
        body,
    }))
}

/// Frame and (when a cipher is installed) encrypt one command.
pub fn write_one(
    command: u16,
    flag: u32,
    body: &[u8],
    version: Version,
    crypt_out: &mut Option<Crypt>,
) -> Result<Vec<u8>, NetError> {
    let header_size = version.header_size();
    let unpadded = header_size + body.len();

    let (logical_size, physical_size) = if version.is_v4() {
        let logical = (unpadded + 3) & !3;
        let physical = if crypt_out.is_some() {
            (unpadded + 7) & !7
        } else {
            logical
        };
        (logical, physical)
    } else {
        let size = if crypt_out.is_some() {
            (unpadded + 3) & !3
        } else {
            unpadded
        };
        (size, size)
    };

    if physical_size > MAX_FRAME_SIZE {
        return Err(NetError::TooLarge(physical_size));
    }
    if logical_size > 0xFFFF && !version.is_v4() {
        return Err(NetError::TooLarge(logical_size));
    }

    let mut frame = Vec::with_capacity(physical_size);
    if version.is_v4() {
        frame.extend_from_slice(&(logical_size as u32).to_le_bytes());
        frame.extend_from_slice(&command.to_le_bytes());
        frame.extend_from_slice(&(flag as u16).to_le_bytes());
    } else if version.uses_pc_header() {
        frame.extend_from_slice(&(logical_size as u16).to_le_bytes());
        frame.push(command as u8);
        frame.push(flag as u8);
    } else {
        frame.push(command as u8);
        frame.push(flag as u8);
        frame.extend_from_slice(&(logical_size as u16).to_le_bytes());
    }
    frame.extend_from_slice(body);
    frame.resize(physical_size, 0);

    if let Some(crypt) = crypt_out.as_mut() {
        crypt.encrypt(&mut frame, true)?;
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::crypt::{KeyFile, DetectorCipher, FinalCipher, V2Cipher, V3Cipher};
    use std::sync::Arc;

    fn paired_crypts(version: Version, seed: u32) -> (Option<Crypt>, Option<Crypt>) {
        if version.is_v4() {
            let key = KeyFile::from_generator_seed("frame-test", seed as u64 + 1);
            let mut seed_bytes = [0u8; crate::net::crypt::FINAL_SEED_SIZE];
            for (idx, byte) in seed_bytes.iter_mut().enumerate() {
                *byte = (seed as u8).wrapping_add(idx as u8);
            }
            (
                Some(Crypt::Final(
                    FinalCipher::new(&key, &seed_bytes, false).expect("cipher"),
                )),
                Some(Crypt::Final(
                    FinalCipher::new(&key, &seed_bytes, false).expect("cipher"),
                )),
            )
        } else if version.uses_v2_encryption() {
            (
                Some(Crypt::V2(V2Cipher::new(seed))),
                Some(Crypt::V2(V2Cipher::new(seed))),
            )
        } else {
            (
                Some(Crypt::V3(V3Cipher::new(seed))),
                Some(Crypt::V3(V3Cipher::new(seed))),
            )
        }
    }

    #[test]
    fn round_trip_every_version_with_cipher() {
        for version in Version::ALL {
            let (mut enc, mut dec) = paired_crypts(version, 0x0BAD_F00D);
            let body: Vec<u8> = (0..0x48u8).collect();
            let wire =
                write_one(0x60, 0x03, &body, version, &mut enc).expect("write");
            let mut buf = wire.clone();
            let read = read_one(&mut buf, version, &mut dec)
                .expect("read")
                .expect("complete");
            assert_eq!(read.command, 0x60, "{:?}", version);
            assert_eq!(read.flag, 0x03);
            assert_eq!(read.body, body);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn round_trip_without_cipher() {
        for version in Version::ALL {
            let body = vec![0x55u8; 0x20];
            let wire = write_one(0x19, 0x00, &body, version, &mut None).expect("write");
            let mut buf = wire.clone();
            let read = read_one(&mut buf, version, &mut None)
                .expect("read")
                .expect("complete");
            assert_eq!(read.body, body);
        }
    }

    #[test]
    fn partial_frames_are_not_ready() {
        let body = vec![0u8; 0x40];
        let wire = write_one(0x61, 0x00, &body, Version::V2, &mut None).expect("write");
        for cut in 0..wire.len() {
            let mut buf = wire[..cut].to_vec();
            assert!(read_one(&mut buf, Version::V2, &mut None)
                .expect("read")
                .is_none());
            assert_eq!(buf.len(), cut, "no bytes may be consumed before readiness");
        }
    }

    #[test]
    fn final_ciphertext_is_padded_to_eight_but_body_is_not() {
        let (mut enc, mut dec) = paired_crypts(Version::Final, 7);
        let body = vec![0xAAu8; 0x14];
        let wire = write_one(0x6D, 0x01, &body, Version::Final, &mut enc).expect("write");
        assert_eq!(wire.len() % 8, 0);
        // Logical size in the header is only 4-rounded.
        let mut buf = wire;
        let read = read_one(&mut buf, Version::Final, &mut dec)
            .expect("read")
            .expect("complete");
        assert_eq!(read.body, body);
    }

    #[test]
    fn oversized_write_is_rejected() {
        let body = vec![0u8; MAX_FRAME_SIZE];
        let err = write_one(0x60, 0, &body, Version::Final, &mut None).unwrap_err();
        assert!(matches!(err, NetError::TooLarge(_)));
    }

    #[test]
    fn oversized_inbound_size_field_closes_the_channel() {
        // Console header with a size field over the limit.
        let mut buf = vec![0x60u8, 0x00, 0xFF, 0xFF];
        buf.resize(0x40, 0);
        let err = read_one(&mut buf, Version::V2, &mut None).unwrap_err();
        assert!(matches!(err, NetError::Frame(_)));
    }

    #[test]
    fn two_buffered_frames_read_in_order() {
        let (mut enc, mut dec) = paired_crypts(Version::ConsoleA, 11);
        let first = write_one(0x60, 0, &[1, 2, 3, 4], Version::ConsoleA, &mut enc)
            .expect("write");
        let second = write_one(0x62, 2, &[5, 6, 7, 8], Version::ConsoleA, &mut enc)
            .expect("write");
        let mut buf = [first, second].concat();
        let a = read_one(&mut buf, Version::ConsoleA, &mut dec)
            .expect("read")
            .expect("complete");
        let b = read_one(&mut buf, Version::ConsoleA, &mut dec)
            .expect("read")
            .expect("complete");
        assert_eq!(a.command, 0x60);
        assert_eq!(a.body, vec![1, 2, 3, 4]);
        assert_eq!(b.command, 0x62);
        assert_eq!(b.body, vec![5, 6, 7, 8]);
    }

    #[test]
    fn detector_peek_then_consume_stays_consistent() {
        // A header peek happens before the body arrives; the re-decryption
        // with advance must produce the same plaintext.
        let key = Arc::new(KeyFile::from_generator_seed("peek", 5));
        let mut seed = [0u8; crate::net::crypt::FINAL_SEED_SIZE];
        for (idx, byte) in seed.iter_mut().enumerate() {
            *byte = idx as u8;
        }
        let mut client_out = Some(Crypt::Final(
            FinalCipher::new(&key, &seed, false).expect("cipher"),
        ));
        let body = vec![0x33u8; 0xA8];
        let wire = write_one(0x93, 0, &body, Version::Final, &mut client_out).expect("write");

        let detector = DetectorCipher::new(vec![Arc::clone(&key)], &seed).expect("detector");
        let mut crypt_in = Some(Crypt::Detector(detector));

        // Feed the header only: not ready, nothing consumed.
        let mut buf = wire[..8].to_vec();
        assert!(read_one(&mut buf, Version::Final, &mut crypt_in)
            .expect("read")
            .is_none());
        // Now the rest arrives.
        buf.extend_from_slice(&wire[8..]);
        let read = read_one(&mut buf, Version::Final, &mut crypt_in)
            .expect("read")
            .expect("complete");
        assert_eq!(read.command, 0x93);
        assert_eq!(read.body, body);
        assert!(crypt_in.as_ref().expect("crypt").is_identified_detector());
    }
}
