/*
 * This file is part of the Sitora hosting platform.
 *
 * Copyright (C) 2025 Kovács Dávid <kapcsolat@kovacsdavid.dev>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use rand::RngExt;

const ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PUNCTUATION: &[u8] = b"!@#$%^&*";
const HEX: &[u8] = b"0123456789abcdef";

/// Generates a random alphanumeric string of the requested length from the
/// OS-seeded CSPRNG.
pub fn generate_string_csprng(length: usize) -> String {
    sample(ALNUM, length)
}

/// Generates a random secret of the requested length drawn from the 62
/// alphanumeric characters plus 8 punctuation characters. Used for site and
/// database credentials.
pub fn generate_secret_csprng(length: usize) -> String {
    let alphabet: Vec<u8> = ALNUM.iter().chain(PUNCTUATION.iter()).copied().collect();
    sample(&alphabet, length)
}

/// Generates `length` random lowercase hex characters.
pub fn generate_hex_csprng(length: usize) -> String {
    sample(HEX, length)
}

fn sample(alphabet: &[u8], length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_string_has_requested_length() {
        assert_eq!(generate_string_csprng(40).len(), 40);
        assert_eq!(generate_secret_csprng(16).len(), 16);
        assert_eq!(generate_hex_csprng(6).len(), 6);
    }

    #[test]
    fn test_generated_secret_uses_allowed_alphabet() {
        let allowed: HashSet<char> = ALNUM
            .iter()
            .chain(PUNCTUATION.iter())
            .map(|b| *b as char)
            .collect();
        for c in generate_secret_csprng(256).chars() {
            assert!(allowed.contains(&c));
        }
    }

    #[test]
    fn test_generated_hex_is_hex() {
        assert!(
            generate_hex_csprng(64)
                .chars()
                .all(|c| c.is_ascii_hexdigit())
        );
    }

    #[test]
    fn test_two_secrets_differ() {
        assert_ne!(generate_secret_csprng(20), generate_secret_csprng(20));
    }
}
