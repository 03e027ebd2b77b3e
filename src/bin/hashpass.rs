//! Prints argon2 hashes for seeding `app_user.password_hash`.
//!
//! Usage: hashpass <password> [<password> ...]

use anyhow::{bail, Context};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHasher};

fn main() -> anyhow::Result<()> {
    let passwords: Vec<String> = std::env::args().skip(1).collect();
    if passwords.is_empty() {
        bail!("usage: hashpass <password> [<password> ...]");
    }

    let argon = Argon2::default();
    for (i, password) in passwords.iter().enumerate() {
        let salt = SaltString::generate(&mut OsRng);
        let phc = argon
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("hashing password #{}", i + 1))?
            .to_string();
        println!("{phc}");
    }
    Ok(())
}
