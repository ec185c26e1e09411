//! # xfer-ftp: failover FTP/FTPS connections
//!
//! Connects to the first server in an ordered list that accepts the
//! configured credentials, retrying each server a bounded number of times.
//! Secure connections use explicit FTPS (AUTH TLS, PBSZ 0, PROT P) with
//! trust and client-identity material loaded from a local or remote
//! keystore and cached with a time-to-live.

pub mod ftp;

pub use ftp::*;
