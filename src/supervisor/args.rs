use crate::profile::Profile;

/// Worker flag for each profile field, in emission order.
const FLAG_ORDER: [&str; 6] = ["-f", "-l", "-token", "-ip", "-dns", "-ech"];

/// Build the worker argument list from a profile. A flag is emitted only
/// when its field is non-blank; values are passed trimmed.
pub fn launch_args(p: &Profile) -> Vec<String> {
    let values = [
        &p.remote_address,
        &p.listen_address,
        &p.auth_token,
        &p.preferred_ip,
        &p.doh_resolver,
        &p.ech_domain,
    ];
    FLAG_ORDER
        .iter()
        .zip(values)
        .filter_map(|(flag, v)| {
            let v = v.trim();
            (!v.is_empty()).then(|| [flag.to_string(), v.to_string()])
        })
        .flatten()
        .collect()
}

/// Copy-pasteable preview of the worker invocation. The token value is masked.
pub fn preview(program: &str, args: &[String]) -> String {
    let mut words = vec![program.to_string()];
    let mut mask_next = false;
    for a in args {
        if mask_next {
            words.push("***".to_string());
            mask_next = false;
            continue;
        }
        mask_next = a == "-token";
        words.push(a.clone());
    }
    crate::util::shell_join(&words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        let mut p = Profile::new("t");
        p.remote_address = "example.com:443".into();
        p.listen_address = "127.0.0.1:30000".into();
        p.preferred_ip = "1.2.3.4".into();
        p.ech_domain = "cloudflare-ech.com".into();
        p
    }

    #[test]
    fn test_empty_fields_produce_no_flag() {
        assert_eq!(
            launch_args(&profile()).join(" "),
            "-f example.com:443 -l 127.0.0.1:30000 -ip 1.2.3.4 -ech cloudflare-ech.com"
        );
    }

    #[test]
    fn test_all_fields_in_fixed_order() {
        let mut p = profile();
        p.auth_token = "tok".into();
        p.doh_resolver = "dns.alidns.com/dns-query".into();
        assert_eq!(
            launch_args(&p),
            vec![
                "-f",
                "example.com:443",
                "-l",
                "127.0.0.1:30000",
                "-token",
                "tok",
                "-ip",
                "1.2.3.4",
                "-dns",
                "dns.alidns.com/dns-query",
                "-ech",
                "cloudflare-ech.com"
            ]
        );
    }

    #[test]
    fn test_blank_fields_are_omitted() {
        let mut p = Profile::new("t");
        p.remote_address = "  ".into();
        p.listen_address = " 127.0.0.1:1080 ".into();
        assert_eq!(launch_args(&p), vec!["-l", "127.0.0.1:1080"]);
        assert!(launch_args(&Profile::new("empty")).is_empty());
    }

    #[test]
    fn test_preview_masks_token() {
        let args: Vec<String> = ["-f", "a:1", "-token", "secret value"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(preview("ech-workers", &args), "ech-workers -f a:1 -token '***'");
    }
}
