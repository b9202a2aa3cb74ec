use rand::seq::SliceRandom;
use rand::Rng;

const NAME_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Prefix plus random lowercase-alphanumeric suffix
pub fn random_name(prefix: &str, random_len: usize) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..random_len)
        .map(|_| NAME_CHARS[rng.gen_range(0..NAME_CHARS.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

pub fn resource_group_name() -> String {
    random_name("vmcapture-rg-", 8)
}

/// Storage account names must be 3-24 lowercase alphanumeric characters,
/// globally unique
pub fn storage_account_name() -> String {
    random_name("vmcap", 12)
}

pub fn dns_label() -> String {
    random_name("pip", 10)
}

pub fn vm_name(index: u32) -> String {
    random_name(&format!("vm{}-", index), 8)
}

pub fn admin_username() -> String {
    random_name("vmadmin", 4)
}

/// Random password with one character from each class the provider requires
pub fn admin_password() -> String {
    const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    const LOWER: &[u8] = b"abcdefghijkmnpqrstuvwxyz";
    const DIGIT: &[u8] = b"23456789";
    const SYMBOL: &[u8] = b"!@#%^&*";
    const ALL: &[&[u8]] = &[UPPER, LOWER, DIGIT, SYMBOL];

    let mut rng = rand::thread_rng();
    let mut chars: Vec<char> = ALL
        .iter()
        .map(|pool| pool[rng.gen_range(0..pool.len())] as char)
        .collect();
    for _ in 0..12 {
        let pool = ALL[rng.gen_range(0..ALL.len())];
        chars.push(pool[rng.gen_range(0..pool.len())] as char);
    }
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}
