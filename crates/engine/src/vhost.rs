// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-application reverse-proxy site files.
//!
//! Port-based only: each application binds its two allocated ports.
//! The internal port strips frame headers so the UI can embed the app
//! in an iframe.

/// Path of an application's site file inside the appliance.
pub fn site_path(hostname: &str) -> String {
    format!("/etc/caddy/sites-enabled/{hostname}")
}

/// Render the Caddy site for one application.
pub fn render_site(
    hostname: &str,
    backend_ip: &str,
    backend_port: u16,
    public_port: u16,
    internal_port: u16,
) -> String {
    format!(
        "# {hostname} (managed)\n\
         :{public_port} {{\n\
         \treverse_proxy {backend_ip}:{backend_port}\n\
         }}\n\
         \n\
         :{internal_port} {{\n\
         \treverse_proxy {backend_ip}:{backend_port} {{\n\
         \t\theader_down -X-Frame-Options\n\
         \t\theader_down -Content-Security-Policy\n\
         \t}}\n\
         }}\n"
    )
}

/// The root Caddyfile: global options plus the per-app imports.
pub fn render_caddyfile() -> String {
    "{\n\tadmin off\n\tauto_https off\n}\n\nimport /etc/caddy/sites-enabled/*\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_binds_both_ports_to_backend() {
        let site = render_site("app01", "10.20.0.150", 8080, 30000, 40000);
        assert!(site.contains(":30000 {"));
        assert!(site.contains(":40000 {"));
        assert_eq!(site.matches("reverse_proxy 10.20.0.150:8080").count(), 2);
    }

    #[test]
    fn only_internal_port_strips_frame_headers() {
        let site = render_site("app01", "10.20.0.150", 8080, 30000, 40000);
        let internal_block = site.split(":40000").nth(1).unwrap();
        assert!(internal_block.contains("header_down -X-Frame-Options"));
        let public_block = site.split(":40000").next().unwrap();
        assert!(!public_block.contains("header_down"));
    }

    #[test]
    fn site_path_is_per_hostname() {
        assert_eq!(site_path("app01"), "/etc/caddy/sites-enabled/app01");
    }

    #[test]
    fn caddyfile_imports_sites() {
        let caddyfile = render_caddyfile();
        assert!(caddyfile.contains("import /etc/caddy/sites-enabled/*"));
        assert!(caddyfile.contains("auto_https off"));
    }
}
