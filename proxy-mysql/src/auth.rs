// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Auth plugin scrambles
//!
//! `mysql_native_password`:
//!   SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))
//!
//! `caching_sha2_password`:
//!   SHA256(password) XOR SHA256(SHA256(SHA256(password)) + salt)

use sha1::{Digest, Sha1};
use sha2::Sha256;

pub fn scramble_native_password(salt: &[u8], password: &str) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let sha1_pass = Sha1::digest(password.as_bytes());
    let double_sha1 = Sha1::digest(sha1_pass);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(double_sha1);
    let salted = hasher.finalize();

    sha1_pass
        .iter()
        .zip(salted.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

pub fn verify_native_password(password: &str, auth_response: &[u8], salt: &[u8]) -> bool {
    scramble_native_password(salt, password) == auth_response
}

pub fn scramble_caching_sha2(salt: &[u8], password: &str) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let sha2_pass = Sha256::digest(password.as_bytes());
    let double_sha2 = Sha256::digest(sha2_pass);

    let mut hasher = Sha256::new();
    hasher.update(double_sha2);
    hasher.update(salt);
    let salted = hasher.finalize();

    sha2_pass
        .iter()
        .zip(salted.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

pub fn verify_caching_sha2(password: &str, auth_response: &[u8], salt: &[u8]) -> bool {
    scramble_caching_sha2(salt, password) == auth_response
}
