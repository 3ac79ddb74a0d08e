//! The tunnel worker: owns the SSH session to the bastion and forwards
//! `127.0.0.1:LOCAL_PORT` to `DB_HOST:DB_PORT` through it.

mod forwarder;
pub(crate) mod handler;
pub(crate) mod tunnel;
pub(crate) mod worker;
