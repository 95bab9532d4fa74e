use rand::RngCore;

use crate::constants::ROOM_ID_BYTES;

/// Generate a fresh room identifier: 16 random bytes as lowercase hex.
pub fn generate_room_id() -> String {
    let mut bytes = [0u8; ROOM_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_shape() {
        let id = generate_room_id();
        assert_eq!(id.len(), ROOM_ID_BYTES * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_room_ids_are_unique() {
        assert_ne!(generate_room_id(), generate_room_id());
    }
}
