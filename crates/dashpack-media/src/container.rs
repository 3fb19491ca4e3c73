//! Media container sniffing.

/// Containers the demuxer can recognize. Only ISO BMFF is handled in this
/// crate; the MPEG-2 TS and WVM parsers are external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaContainer {
    Mp4,
    Mpeg2Ts,
    Wvm,
    Unknown,
}

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;

// FourCCs that may legally start an ISO BMFF stream.
const MP4_TOP_LEVEL_TYPES: [&[u8; 4]; 14] = [
    b"ftyp", b"pdin", b"moov", b"moof", b"mfra", b"mdat", b"free", b"skip", b"meta", b"meco",
    b"styp", b"sidx", b"ssix", b"prft",
];

fn looks_like_mp4(buf: &[u8]) -> bool {
    if buf.len() < 8 {
        return false;
    }
    let fourcc: [u8; 4] = [buf[4], buf[5], buf[6], buf[7]];
    MP4_TOP_LEVEL_TYPES.iter().any(|t| **t == fourcc)
}

fn looks_like_mpeg2ts(buf: &[u8]) -> bool {
    if buf.len() < 3 * TS_PACKET_SIZE + 1 {
        return buf.first() == Some(&TS_SYNC_BYTE);
    }
    (0..3).all(|i| buf[i * TS_PACKET_SIZE] == TS_SYNC_BYTE)
}

fn looks_like_wvm(buf: &[u8]) -> bool {
    // WVM is an MPEG-2 PS variant; look for a pack start code.
    buf.len() >= 4 && buf[0] == 0x00 && buf[1] == 0x00 && buf[2] == 0x01 && buf[3] == 0xBA
}

/// Guess the container from the first bytes of the stream.
pub fn determine_container(buf: &[u8]) -> MediaContainer {
    if looks_like_mp4(buf) {
        MediaContainer::Mp4
    } else if looks_like_mpeg2ts(buf) {
        MediaContainer::Mpeg2Ts
    } else if looks_like_wvm(buf) {
        MediaContainer::Wvm
    } else {
        MediaContainer::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_mp4() {
        let mut buf = vec![0, 0, 0, 24];
        buf.extend_from_slice(b"ftyp");
        buf.extend_from_slice(&[0; 16]);
        assert_eq!(determine_container(&buf), MediaContainer::Mp4);

        let mut buf = vec![0, 0, 0, 16];
        buf.extend_from_slice(b"styp");
        assert_eq!(determine_container(&buf), MediaContainer::Mp4);
    }

    #[test]
    fn detects_mpeg2ts() {
        let mut buf = vec![0u8; 188 * 4];
        for i in 0..4 {
            buf[i * 188] = 0x47;
        }
        assert_eq!(determine_container(&buf), MediaContainer::Mpeg2Ts);
    }

    #[test]
    fn detects_unknown() {
        assert_eq!(determine_container(b"RIFFxxxxWAVE"), MediaContainer::Unknown);
        assert_eq!(determine_container(&[]), MediaContainer::Unknown);
    }
}
