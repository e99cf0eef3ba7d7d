#![allow(dead_code)]
use std::path::Path;
use zatca_sign::certificate::CertificateMaterial;

/// Sample compliance certificate (base64 DER), as issued by the sandbox.
pub const SAMPLE_CERT: &str = "MIICAzCCAaqgAwIBAgIGAZT7anBcMAoGCCqGSM49BAMCMBUxEzARBgNVBAMMCmVJbnZvaWNpbmcwHhcNMjUwMjEyMTgyNzE5WhcNMzAwMjExMjEwMDAwWjBUMRgwFgYDVQQDDA9NeSBPcmdhbml6YXRpb24xEzARBgNVBAoMCk15IENvbXBhbnkxFjAUBgNVBAsMDUlUIERlcGFydG1lbnQxCzAJBgNVBAYTAlNBMFYwEAYHKoZIzj0CAQYFK4EEAAoDQgAEdg+fe1K42qCMlH8MQmxi02RzKU3SfNHA5QUTh9ub6vqiTvY5ON0Q3CjBJ2qzrCeBguijyQQCFARDulpKaWAaW6OBqTCBpjAMBgNVHRMBAf8EAjAAMIGVBgNVHREEgY0wgYqkgYcwgYQxIDAeBgNVBAQMFzEtU2FsZWh8Mi0xbnwzLVNNRTAwMDIzMR8wHQYKCZImiZPyLGQBAQwPMzEyMzQ1Njc4OTAxMjMzMQ0wCwYDVQQMDAQxMTAwMRswGQYDVQQaDBJSaXlhZGggMTIzNCBTdHJlZXQxEzARBgNVBA8MClRlY2hub2xvZ3kwCgYIKoZIzj0EAwIDRwAwRAIgINT+MFQefLLdd7Jlayr8nZq1lQrXQgKYxuA14LRoDvUCIGVS+MserlYamKvlCtk/g9J4gPWoJMXygSGp7FTPV8e4";

/// The matching secp256k1 private key (base64 PKCS#8 DER).
pub const SAMPLE_KEY: &str = "MIGEAgEAMBAGByqGSM49AgEGBSuBBAAKBG0wawIBAQQgPsPX88rLECL/346pDroiltt9ZFz8arMlt3FHeqdxaD6hRANCAAR2D597UrjaoIyUfwxCbGLTZHMpTdJ80cDlBROH25vq+qJO9jk43RDcKMEnarOsJ4GC6KPJBAIUBEO6WkppYBpb";

pub const SAMPLE_SECRET: &str = "7v6ZNNZ31NS/ibZImnxSmMGWRRAXvI2qqkv4XF9jjs0=";

pub fn certificate() -> CertificateMaterial {
    CertificateMaterial::new(SAMPLE_CERT, SAMPLE_KEY, SAMPLE_SECRET)
        .expect("sample certificate material")
}

pub fn sample_invoice() -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/invoices/sample-invoice.xml");
    std::fs::read_to_string(path).expect("read sample invoice")
}
