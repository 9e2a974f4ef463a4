// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Small helpers to hash the concatenation of several byte slices without
//! an intermediate allocation, mirroring the `sha1!`/`sha256!` call sites
//! used throughout the MTProto 2.0 key-derivation math.

/// Hash the concatenation of any number of `AsRef<[u8]>` arguments with SHA-1.
#[macro_export]
macro_rules! sha1 {
    ($($x:expr),+ $(,)?) => {{
        use sha1::Digest;
        let mut hasher = sha1::Sha1::new();
        $(hasher.update($x.as_ref());)+
        let result: [u8; 20] = hasher.finalize().into();
        result
    }};
}

/// Hash the concatenation of any number of `AsRef<[u8]>` arguments with SHA-256.
#[macro_export]
macro_rules! sha256 {
    ($($x:expr),+ $(,)?) => {{
        use sha2::Digest;
        let mut hasher = sha2::Sha256::new();
        $(hasher.update($x.as_ref());)+
        let result: [u8; 32] = hasher.finalize().into();
        result
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn sha1_concat() {
        let a = [1u8, 2, 3];
        let b = [4u8, 5, 6];
        let direct = sha1!(&[1u8, 2, 3, 4, 5, 6]);
        let split = sha1!(&a, &b);
        assert_eq!(direct, split);
    }

    #[test]
    fn sha256_concat() {
        let a = [1u8, 2, 3];
        let b = [4u8, 5, 6];
        let direct = sha256!(&[1u8, 2, 3, 4, 5, 6]);
        let split = sha256!(&a, &b);
        assert_eq!(direct, split);
    }
}
