mod client;
mod models;

pub use client::{OkxClient, OkxCredentials};
