use std::sync::{Arc, Mutex};

use crate::net::error::NetError;

pub const V2_STREAM_LENGTH: usize = 57;
pub const V3_STREAM_LENGTH: usize = 521;
pub const FINAL_STREAM_LENGTH: usize = 1042;
pub const FINAL_SEED_SIZE: usize = 0x30;

/// Command ids a freshly connected final-version client may legitimately send
/// first. The detector accepts a candidate key only when the trial decryption
/// yields one of these.
const FINAL_LOGIN_COMMANDS: [u16; 5] = [0x0093, 0x009C, 0x009D, 0x009E, 0x00DB];

/// Second-generation stream cipher: 57-word state seeded from a single u32.
/// Both directions of a channel run independent instances.
#[derive(Debug, Clone)]
pub struct V2Cipher {
    stream: [u32; V2_STREAM_LENGTH],
    offset: u16,
}

impl V2Cipher {
    pub fn new(seed: u32) -> Self {
        let mut stream = [0u32; V2_STREAM_LENGTH];
        let mut esi: u32 = 1;
        let mut ebx: u32 = seed;
        stream[56] = ebx;
        stream[55] = ebx;
        let mut edi: u32 = 0x15;
        while edi <= 0x46E {
            let edx = (edi % 55) as usize;
            ebx = ebx.wrapping_sub(esi);
            edi += 0x15;
            stream[edx] = esi;
            esi = ebx;
            ebx = stream[edx];
        }
        let mut cipher = Self { stream, offset: 56 };
        for _ in 0..4 {
            cipher.update_stream();
        }
        cipher.offset = 56;
        cipher
    }

    fn update_stream(&mut self) {
        for i in 1..=0x18 {
            self.stream[i] = self.stream[i].wrapping_sub(self.stream[i + 0x1F]);
        }
        for i in 0x19..=0x37 {
            self.stream[i] = self.stream[i].wrapping_sub(self.stream[i - 0x18]);
        }
    }

    pub fn next(&mut self, advance: bool) -> u32 {
        if self.offset as usize == V2_STREAM_LENGTH {
            self.update_stream();
            self.offset = 1;
        }
        let value = self.stream[self.offset as usize];
        if advance {
            self.offset += 1;
        }
        value
    }

    pub fn apply(&mut self, data: &mut [u8], advance: bool) -> Result<(), NetError> {
        xor_keystream_words(data, advance, |advance| self.next(advance))
    }

    pub fn skip(&mut self, bytes: usize) {
        for _ in 0..bytes / 4 {
            self.next(true);
        }
    }
}

/// Third-generation stream cipher: same contract as [`V2Cipher`] with a
/// 521-word state and a different key schedule.
#[derive(Debug, Clone)]
pub struct V3Cipher {
    stream: [u32; V3_STREAM_LENGTH],
    offset: u16,
}

impl V3Cipher {
    pub fn new(seed: u32) -> Self {
        let mut stream = [0u32; V3_STREAM_LENGTH];
        let mut seed = seed;
        let mut basekey: u32 = 0;
        let mut offset = 0usize;
        for _ in 0..=16 {
            for _ in 0..32 {
                seed = seed.wrapping_mul(0x5D58_8B65);
                basekey >>= 1;
                seed = seed.wrapping_add(1);
                if seed & 0x8000_0000 != 0 {
                    basekey |= 0x8000_0000;
                } else {
                    basekey &= 0x7FFF_FFFF;
                }
            }
            stream[offset] = basekey;
            offset += 1;
        }
        stream[offset - 1] =
            ((stream[0] >> 9) ^ (stream[offset - 1] << 23)) ^ stream[15];
        let mut source1 = 0usize;
        let mut source2 = 1usize;
        let mut source3 = offset - 1;
        while offset != V3_STREAM_LENGTH {
            stream[offset] = stream[source3]
                ^ (((stream[source1] << 23) & 0xFF80_0000)
                    ^ ((stream[source2] >> 9) & 0x007F_FFFF));
            offset += 1;
            source1 += 1;
            source2 += 1;
            source3 += 1;
        }
        let mut cipher = Self { stream, offset: 0 };
        cipher.update_stream();
        cipher.update_stream();
        cipher.update_stream();
        cipher
    }

    fn update_stream(&mut self) {
        let mut r5 = 0usize;
        let mut r6 = 489usize;
        let mut r7 = 0usize;
        while r6 != V3_STREAM_LENGTH {
            self.stream[r5] ^= self.stream[r6];
            r5 += 1;
            r6 += 1;
        }
        while r5 != V3_STREAM_LENGTH {
            self.stream[r5] ^= self.stream[r7];
            r5 += 1;
            r7 += 1;
        }
        self.offset = 0;
    }

    pub fn next(&mut self, advance: bool) -> u32 {
        if self.offset as usize == V3_STREAM_LENGTH {
            self.update_stream();
        }
        let value = self.stream[self.offset as usize];
        if advance {
            self.offset += 1;
        }
        value
    }

    pub fn apply(&mut self, data: &mut [u8], advance: bool) -> Result<(), NetError> {
        xor_keystream_words(data, advance, |advance| self.next(advance))
    }

    pub fn skip(&mut self, bytes: usize) {
        for _ in 0..bytes / 4 {
            self.next(true);
        }
    }
}

/// Private key material for the final version: 18 round keys plus 1024
/// private words, loaded from the server's key pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFile {
    pub name: String,
    pub initial_keys: [u32; 18],
    pub private_keys: [u32; 1024],
}

impl KeyFile {
    /// Deterministic key file for tests and default installs.
    pub fn from_generator_seed(name: &str, seed: u64) -> KeyFile {
        let mut state = seed | 1;
        let mut next = || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 32) as u32
        };
        let mut initial_keys = [0u32; 18];
        for key in initial_keys.iter_mut() {
            *key = next();
        }
        let mut private_keys = [0u32; 1024];
        for key in private_keys.iter_mut() {
            *key = next();
        }
        KeyFile {
            name: name.to_string(),
            initial_keys,
            private_keys,
        }
    }
}

/// Final-version cipher: a 1042-word keystream derived from the key file and
/// a 48-byte session seed. The server-to-client and client-to-server sides
/// scramble the seed differently, so the two directions never share a
/// keystream even for the same key file.
#[derive(Debug, Clone)]
pub struct FinalCipher {
    stream: Vec<u32>,
    offset: usize,
}

impl FinalCipher {
    pub fn new(key: &KeyFile, seed: &[u8], is_server_side: bool) -> Result<Self, NetError> {
        if seed.len() != FINAL_SEED_SIZE {
            return Err(NetError::Cipher(format!(
                "final cipher seed must be {} bytes, got {}",
                FINAL_SEED_SIZE,
                seed.len()
            )));
        }
        Ok(Self {
            stream: derive_final_stream(key, seed, is_server_side),
            offset: 0,
        })
    }

    pub fn apply(&mut self, data: &mut [u8], advance: bool) {
        let saved = self.offset;
        for byte in data.iter_mut() {
            let word = self.stream[(self.offset / 4) % FINAL_STREAM_LENGTH];
            *byte ^= word.to_le_bytes()[self.offset % 4];
            self.offset += 1;
        }
        if !advance {
            self.offset = saved;
        }
    }

    pub fn skip(&mut self, bytes: usize) {
        self.offset += bytes;
    }
}

fn derive_final_stream(key: &KeyFile, seed: &[u8], is_server_side: bool) -> Vec<u32> {
    let pad = if is_server_side { 0x5C } else { 0x36 };
    let mut seed_words = [0u32; FINAL_SEED_SIZE / 4];
    for (idx, chunk) in seed.chunks_exact(4).enumerate() {
        let scrambled = [
            (chunk[0] ^ pad).wrapping_sub(idx as u8),
            chunk[1] ^ pad,
            chunk[2] ^ pad,
            (chunk[3] ^ pad).wrapping_add(idx as u8),
        ];
        seed_words[idx] = u32::from_le_bytes(scrambled);
    }

    let mut stream: Vec<u32> = Vec::with_capacity(FINAL_STREAM_LENGTH);
    stream.extend_from_slice(&key.initial_keys);
    stream.extend_from_slice(&key.private_keys);

    let mut acc: u32 = 0x9E37_79B9;
    for idx in 0..FINAL_STREAM_LENGTH {
        acc = acc
            .wrapping_add(seed_words[idx % seed_words.len()])
            .rotate_left(3)
            ^ stream[idx];
        stream[idx] = acc;
    }
    for idx in 0..FINAL_STREAM_LENGTH {
        let partner = (idx + 521) % FINAL_STREAM_LENGTH;
        stream[idx] ^= stream[partner].rotate_right(7);
    }
    stream
}

struct DetectorState {
    candidates: Vec<Arc<KeyFile>>,
    client_seed: [u8; FINAL_SEED_SIZE],
    identified: Option<(Arc<KeyFile>, FinalCipher)>,
    failed: bool,
}

/// Inbound cipher for final-version sessions whose private key is not known
/// in advance. Trial-decrypts the first ciphertext against every candidate
/// key file and commits to the one that yields a recognizable login command.
#[derive(Clone)]
pub struct DetectorCipher {
    state: Arc<Mutex<DetectorState>>,
}

impl DetectorCipher {
    pub fn new(candidates: Vec<Arc<KeyFile>>, client_seed: &[u8]) -> Result<Self, NetError> {
        if client_seed.len() != FINAL_SEED_SIZE {
            return Err(NetError::Cipher("detector seed has wrong size".to_string()));
        }
        let mut seed = [0u8; FINAL_SEED_SIZE];
        seed.copy_from_slice(client_seed);
        Ok(Self {
            state: Arc::new(Mutex::new(DetectorState {
                candidates,
                client_seed: seed,
                identified: None,
                failed: false,
            })),
        })
    }

    pub fn is_identified(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.identified.is_some())
            .unwrap_or(false)
    }

    pub fn identified_key(&self) -> Option<Arc<KeyFile>> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.identified.as_ref().map(|(key, _)| Arc::clone(key)))
    }

    pub fn apply(&self, data: &mut [u8], advance: bool) -> Result<(), NetError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NetError::Internal("detector lock poisoned".to_string()))?;
        if state.failed {
            return Err(NetError::Cipher(
                "detector already failed to identify the client key".to_string(),
            ));
        }
        if state.identified.is_none() {
            let chosen = identify_candidate(&state.candidates, &state.client_seed, data)?;
            let cipher = FinalCipher::new(&chosen, &state.client_seed, false)?;
            state.identified = Some((chosen, cipher));
        }
        if let Some((_, cipher)) = state.identified.as_mut() {
            cipher.apply(data, advance);
        }
        Ok(())
    }

    pub fn skip(&self, bytes: usize) -> Result<(), NetError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NetError::Internal("detector lock poisoned".to_string()))?;
        match state.identified.as_mut() {
            Some((_, cipher)) => {
                cipher.skip(bytes);
                Ok(())
            }
            None => Err(NetError::Cipher("skip before identification".to_string())),
        }
    }

    fn mark_failed(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failed = true;
        }
    }
}

fn identify_candidate(
    candidates: &[Arc<KeyFile>],
    client_seed: &[u8; FINAL_SEED_SIZE],
    ciphertext: &[u8],
) -> Result<Arc<KeyFile>, NetError> {
    if ciphertext.len() < 8 {
        return Err(NetError::Cipher(
            "first ciphertext is shorter than a frame header".to_string(),
        ));
    }
    for candidate in candidates {
        let mut trial = FinalCipher::new(candidate, client_seed, false)?;
        let mut header = [0u8; 8];
        header.copy_from_slice(&ciphertext[..8]);
        trial.apply(&mut header, true);
        if final_login_header_is_plausible(&header) {
            return Ok(Arc::clone(candidate));
        }
    }
    Err(NetError::Cipher(
        "no candidate key decrypts the first command to a login command".to_string(),
    ))
}

fn final_login_header_is_plausible(header: &[u8; 8]) -> bool {
    let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let command = u16::from_le_bytes([header[4], header[5]]);
    let flag = u16::from_le_bytes([header[6], header[7]]);
    size >= 8
        && size <= super::frame::MAX_FRAME_SIZE
        && size % 4 == 0
        && flag == 0
        && FINAL_LOGIN_COMMANDS.contains(&command)
}

/// Outbound twin of a [`DetectorCipher`]: once the inbound side has
/// identified the client's key file, the imitator derives the
/// server-to-client keystream from the same key and the server seed.
pub struct ImitatorCipher {
    detector: DetectorCipher,
    server_seed: [u8; FINAL_SEED_SIZE],
    cipher: Option<FinalCipher>,
}

impl ImitatorCipher {
    pub fn new(detector: &DetectorCipher, server_seed: &[u8]) -> Result<Self, NetError> {
        if server_seed.len() != FINAL_SEED_SIZE {
            return Err(NetError::Cipher("imitator seed has wrong size".to_string()));
        }
        let mut seed = [0u8; FINAL_SEED_SIZE];
        seed.copy_from_slice(server_seed);
        Ok(Self {
            detector: detector.clone(),
            server_seed: seed,
            cipher: None,
        })
    }

    pub fn apply(&mut self, data: &mut [u8], advance: bool) -> Result<(), NetError> {
        if self.cipher.is_none() {
            let key = self.detector.identified_key().ok_or_else(|| {
                NetError::Cipher("imitator used before key identification".to_string())
            })?;
            self.cipher = Some(FinalCipher::new(&key, &self.server_seed, true)?);
        }
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.apply(data, advance);
        }
        Ok(())
    }

    pub fn skip(&mut self, bytes: usize) -> Result<(), NetError> {
        match self.cipher.as_mut() {
            Some(cipher) => {
                cipher.skip(bytes);
                Ok(())
            }
            None => Err(NetError::Cipher("skip before identification".to_string())),
        }
    }
}

/// One direction's cipher slot on a channel.
pub enum Crypt {
    V2(V2Cipher),
    V3(V3Cipher),
    Final(FinalCipher),
    Detector(DetectorCipher),
    Imitator(ImitatorCipher),
}

impl Crypt {
    pub fn encrypt(&mut self, data: &mut [u8], advance: bool) -> Result<(), NetError> {
        self.apply(data, advance)
    }

    pub fn decrypt(&mut self, data: &mut [u8], advance: bool) -> Result<(), NetError> {
        self.apply(data, advance)
    }

    fn apply(&mut self, data: &mut [u8], advance: bool) -> Result<(), NetError> {
        match self {
            Crypt::V2(cipher) => cipher.apply(data, advance),
            Crypt::V3(cipher) => cipher.apply(data, advance),
            Crypt::Final(cipher) => {
                cipher.apply(data, advance);
                Ok(())
            }
            Crypt::Detector(cipher) => {
                let result = cipher.apply(data, advance);
                if result.is_err() {
                    cipher.mark_failed();
                }
                result
            }
            Crypt::Imitator(cipher) => cipher.apply(data, advance),
        }
    }

    pub fn skip(&mut self, bytes: usize) -> Result<(), NetError> {
        match self {
            Crypt::V2(cipher) => {
                cipher.skip(bytes);
                Ok(())
            }
            Crypt::V3(cipher) => {
                cipher.skip(bytes);
                Ok(())
            }
            Crypt::Final(cipher) => {
                cipher.skip(bytes);
                Ok(())
            }
            Crypt::Detector(cipher) => cipher.skip(bytes),
            Crypt::Imitator(cipher) => cipher.skip(bytes),
        }
    }

    pub fn is_identified_detector(&self) -> bool {
        match self {
            Crypt::Detector(cipher) => cipher.is_identified(),
            _ => false,
        }
    }
}

fn xor_keystream_words<F>(data: &mut [u8], advance: bool, mut next: F) -> Result<(), NetError>
where
    F: FnMut(bool) -> u32,
{
    if data.len() % 4 != 0 {
        return Err(NetError::Cipher(format!(
            "stream cipher length {} is not a multiple of 4",
            data.len()
        )));
    }
    for chunk in data.chunks_exact_mut(4) {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ next(advance);
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg_bytes(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed | 1;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            out.push((state >> 56) as u8);
        }
        out
    }

    #[test]
    fn v2_cipher_round_trip() {
        for seed in [0u32, 1, 0xDEAD_BEEF, 0xFFFF_FFFF] {
            let mut enc = V2Cipher::new(seed);
            let mut dec = V2Cipher::new(seed);
            let plain = lcg_bytes(seed as u64 + 7, 0x200);
            let mut buf = plain.clone();
            enc.apply(&mut buf, true).expect("encrypt");
            assert_ne!(buf, plain);
            dec.apply(&mut buf, true).expect("decrypt");
            assert_eq!(buf, plain);
        }
    }

    #[test]
    fn v3_cipher_round_trip_across_stream_refresh() {
        let mut enc = V3Cipher::new(0x1234_5678);
        let mut dec = V3Cipher::new(0x1234_5678);
        // Longer than the 521-word stream, so update_stream runs mid-buffer.
        let plain = lcg_bytes(99, 521 * 4 * 3 + 64);
        let mut buf = plain.clone();
        enc.apply(&mut buf, true).expect("encrypt");
        dec.apply(&mut buf, true).expect("decrypt");
        assert_eq!(buf, plain);
    }

    #[test]
    fn stream_ciphers_reject_unaligned_buffers() {
        let mut cipher = V2Cipher::new(1);
        let mut buf = [0u8; 3];
        assert!(cipher.apply(&mut buf, true).is_err());
    }

    #[test]
    fn peek_without_advance_matches_later_consume() {
        let mut cipher = V2Cipher::new(0xCAFE);
        let mut reference = V2Cipher::new(0xCAFE);
        let mut peeked = [0x11u8, 0x22, 0x33, 0x44];
        let mut consumed = peeked;
        cipher.apply(&mut peeked, false).expect("peek");
        cipher.apply(&mut consumed, true).expect("consume");
        let mut expected = [0x11u8, 0x22, 0x33, 0x44];
        reference.apply(&mut expected, true).expect("reference");
        assert_eq!(peeked, expected);
        assert_eq!(consumed, expected);
    }

    #[test]
    fn final_cipher_round_trip_and_direction_divergence() {
        let key = KeyFile::from_generator_seed("test", 0x42);
        let seed = lcg_bytes(3, FINAL_SEED_SIZE);
        let mut client_enc = FinalCipher::new(&key, &seed, false).expect("cipher");
        let mut client_dec = FinalCipher::new(&key, &seed, false).expect("cipher");
        let mut server = FinalCipher::new(&key, &seed, true).expect("cipher");

        let plain = lcg_bytes(17, FINAL_STREAM_LENGTH * 4 + 24);
        let mut buf = plain.clone();
        client_enc.apply(&mut buf, true);
        let mut server_view = plain.clone();
        server.apply(&mut server_view, true);
        assert_ne!(buf, server_view, "directions must not share a keystream");
        client_dec.apply(&mut buf, true);
        assert_eq!(buf, plain);
    }

    #[test]
    fn final_cipher_handles_odd_lengths() {
        let key = KeyFile::from_generator_seed("test", 0x43);
        let seed = lcg_bytes(4, FINAL_SEED_SIZE);
        let mut enc = FinalCipher::new(&key, &seed, false).expect("cipher");
        let mut dec = FinalCipher::new(&key, &seed, false).expect("cipher");
        let plain = lcg_bytes(5, 13);
        let mut buf = plain.clone();
        enc.apply(&mut buf, true);
        dec.apply(&mut buf, true);
        assert_eq!(buf, plain);
    }

    fn login_frame(key: &KeyFile, seed: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&0xB0u32.to_le_bytes());
        frame.extend_from_slice(&0x0093u16.to_le_bytes());
        frame.extend_from_slice(&0u16.to_le_bytes());
        frame.resize(0xB0, 0);
        let mut cipher = FinalCipher::new(key, seed, false).expect("cipher");
        cipher.apply(&mut frame, true);
        frame
    }

    #[test]
    fn detector_identifies_each_pool_key() {
        let pool: Vec<Arc<KeyFile>> = (0..4)
            .map(|idx| Arc::new(KeyFile::from_generator_seed(&format!("k{idx}"), idx + 100)))
            .collect();
        let seed = lcg_bytes(9, FINAL_SEED_SIZE);

        for expected in &pool {
            let detector = DetectorCipher::new(pool.clone(), &seed).expect("detector");
            let mut frame = login_frame(expected, &seed);
            detector.apply(&mut frame, true).expect("identify");
            assert!(detector.is_identified());
            assert_eq!(
                detector.identified_key().expect("key").name,
                expected.name
            );
            assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 0x0093);
        }
    }

    #[test]
    fn detector_rejects_random_bytes() {
        let pool: Vec<Arc<KeyFile>> = (0..4)
            .map(|idx| Arc::new(KeyFile::from_generator_seed(&format!("k{idx}"), idx + 100)))
            .collect();
        let seed = lcg_bytes(9, FINAL_SEED_SIZE);
        for trial in 0..32 {
            let detector = DetectorCipher::new(pool.clone(), &seed).expect("detector");
            let mut garbage = lcg_bytes(trial + 1000, 0x40);
            assert!(detector.apply(&mut garbage, true).is_err());
            assert!(!detector.is_identified());
        }
    }

    #[test]
    fn imitator_follows_detected_key() {
        let pool: Vec<Arc<KeyFile>> = (0..2)
            .map(|idx| Arc::new(KeyFile::from_generator_seed(&format!("k{idx}"), idx + 7)))
            .collect();
        let client_seed = lcg_bytes(21, FINAL_SEED_SIZE);
        let server_seed = lcg_bytes(22, FINAL_SEED_SIZE);

        let detector = DetectorCipher::new(pool.clone(), &client_seed).expect("detector");
        let mut imitator = ImitatorCipher::new(&detector, &server_seed).expect("imitator");

        let mut probe = [0u8; 8];
        assert!(imitator.apply(&mut probe, true).is_err());

        let mut frame = login_frame(&pool[1], &client_seed);
        detector.apply(&mut frame, true).expect("identify");

        // The client decrypts the server stream with the same key file and
        // the server seed.
        let plain = lcg_bytes(23, 0x80);
        let mut wire = plain.clone();
        imitator.apply(&mut wire, true).expect("imitator encrypt");
        let mut client_side =
            FinalCipher::new(&pool[1], &server_seed, true).expect("cipher");
        client_side.apply(&mut wire, true);
        assert_eq!(wire, plain);
    }
}
