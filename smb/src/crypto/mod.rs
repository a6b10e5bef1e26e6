pub mod des;
pub mod kdf;
pub mod ntlm_v1_extended;
pub mod ntlm_v2;
pub mod preauth;
pub mod signing;
