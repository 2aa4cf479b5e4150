use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Root zone WHOIS, authoritative for TLD records and for finding the
/// registry server of TLDs missing from [`WHOIS_SERVERS`].
pub const IANA_SERVER: &str = "whois.iana.org";

pub static WHOIS_SERVERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // Generic TLDs
    m.insert("com", "whois.verisign-grs.com");
    m.insert("net", "whois.verisign-grs.com");
    m.insert("org", "whois.pir.org");
    m.insert("info", "whois.nic.info");
    m.insert("biz", "whois.nic.biz");
    m.insert("name", "whois.nic.name");
    m.insert("mobi", "whois.nic.mobi");
    m.insert("edu", "whois.educause.edu");
    m.insert("gov", "whois.dotgov.gov");
    m.insert("int", "whois.iana.org");
    m.insert("app", "whois.nic.google");
    m.insert("dev", "whois.nic.google");
    m.insert("page", "whois.nic.google");
    m.insert("xyz", "whois.nic.xyz");
    m.insert("online", "whois.nic.online");
    m.insert("site", "whois.nic.site");
    m.insert("tech", "whois.nic.tech");
    m.insert("cloud", "whois.nic.cloud");

    // Country-code TLDs
    m.insert("ai", "whois.nic.ai");
    m.insert("at", "whois.nic.at");
    m.insert("au", "whois.auda.org.au");
    m.insert("ax", "whois.ax");
    m.insert("be", "whois.dns.be");
    m.insert("br", "whois.registro.br");
    m.insert("ca", "whois.cira.ca");
    m.insert("cc", "ccwhois.verisign-grs.com");
    m.insert("ch", "whois.nic.ch");
    m.insert("cn", "whois.cnnic.cn");
    m.insert("co", "whois.nic.co");
    m.insert("cz", "whois.nic.cz");
    m.insert("de", "whois.denic.de");
    m.insert("dk", "whois.punktum.dk");
    m.insert("ee", "whois.tld.ee");
    m.insert("es", "whois.nic.es");
    m.insert("eu", "whois.eu");
    m.insert("fi", "whois.fi");
    m.insert("fr", "whois.nic.fr");
    m.insert("gg", "whois.gg");
    m.insert("hu", "whois.nic.hu");
    m.insert("ie", "whois.weare.ie");
    m.insert("im", "whois.nic.im");
    m.insert("in", "whois.registry.in");
    m.insert("io", "whois.nic.io");
    m.insert("is", "whois.isnic.is");
    m.insert("it", "whois.nic.it");
    m.insert("je", "whois.je");
    m.insert("jp", "whois.jprs.jp");
    m.insert("kr", "whois.kr");
    m.insert("li", "whois.nic.li");
    m.insert("lt", "whois.domreg.lt");
    m.insert("lu", "whois.dns.lu");
    m.insert("lv", "whois.nic.lv");
    m.insert("me", "whois.nic.me");
    m.insert("mx", "whois.mx");
    m.insert("nl", "whois.domain-registry.nl");
    m.insert("no", "whois.norid.no");
    m.insert("nu", "whois.iis.nu");
    m.insert("nz", "whois.irs.net.nz");
    m.insert("pl", "whois.dns.pl");
    m.insert("pt", "whois.dns.pt");
    m.insert("ro", "whois.rotld.ro");
    m.insert("rs", "whois.rnids.rs");
    m.insert("ru", "whois.tcinet.ru");
    m.insert("se", "whois.iis.se");
    m.insert("si", "whois.register.si");
    m.insert("sk", "whois.sk-nic.sk");
    m.insert("tv", "whois.nic.tv");
    m.insert("tw", "whois.twnic.net.tw");
    m.insert("ua", "whois.ua");
    m.insert("uk", "whois.nic.uk");
    m.insert("us", "whois.nic.us");
    m.insert("za", "whois.registry.net.za");

    m
});

static IANA_REFER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^[ \t]*(?:refer|whois):[ \t]*(\S+)").expect("Invalid IANA referral regex")
});

static REFERRAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?mi)^[ \t]*Registrar WHOIS Server:[ \t]*(\S+)",
        r"(?mi)^[ \t]*Whois Server:[ \t]*(\S+)",
        r"(?mi)^[ \t]*ReferralServer:[ \t]*whois://(\S+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid referral regex"))
    .collect()
});

pub fn get_whois_server(tld: &str) -> Option<&'static str> {
    WHOIS_SERVERS.get(tld.to_lowercase().as_str()).copied()
}

/// Registry server named in an IANA TLD record.
pub fn parse_iana_referral(response: &str) -> Option<String> {
    IANA_REFER
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_lowercase())
        .filter(|server| server.contains('.'))
}

/// Registrar server a thin registry points to, if any.
pub fn parse_referral(response: &str) -> Option<String> {
    REFERRAL_PATTERNS.iter().find_map(|re| {
        let server = re.captures(response)?.get(1)?.as_str().trim().to_lowercase();
        let server = server.trim_start_matches("whois://").trim_end_matches('/');
        (server.contains('.')).then(|| server.to_string())
    })
}

/// Query line for `domain`, in the dialect some registries require.
pub fn query_for(server: &str, domain: &str) -> String {
    match server {
        // English output instead of Japanese
        "whois.jprs.jp" => format!("{}/e", domain),
        // Full record instead of the status-only answer
        "whois.denic.de" => format!("-T dn,ace {}", domain),
        _ => domain.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_whois_server() {
        assert_eq!(get_whois_server("com"), Some("whois.verisign-grs.com"));
        assert_eq!(get_whois_server("RS"), Some("whois.rnids.rs"));
        assert_eq!(get_whois_server("zz"), None);
    }

    #[test]
    fn test_parse_iana_referral() {
        let response = "% IANA WHOIS server\n\ndomain:       FI\n\norganisation: Finnish Transport and Communications Agency\nwhois:        whois.fi\n\nstatus:       ACTIVE\n";
        assert_eq!(parse_iana_referral(response), Some("whois.fi".to_string()));
        assert_eq!(parse_iana_referral("refer:        whois.nic.im\n"), Some("whois.nic.im".to_string()));
        assert_eq!(parse_iana_referral("domain: EXAMPLE\n"), None);
    }

    #[test]
    fn test_parse_referral() {
        let response = "   Domain Name: EXAMPLE.COM\n   Registrar WHOIS Server: whois.markmonitor.com\n";
        assert_eq!(parse_referral(response), Some("whois.markmonitor.com".to_string()));
        assert_eq!(
            parse_referral("ReferralServer: whois://whois.ripe.net/\n"),
            Some("whois.ripe.net".to_string())
        );
        assert_eq!(parse_referral("Registrar WHOIS Server: \n"), None);
    }

    #[test]
    fn test_query_for() {
        assert_eq!(query_for("whois.jprs.jp", "google.jp"), "google.jp/e");
        assert_eq!(query_for("whois.denic.de", "denic.de"), "-T dn,ace denic.de");
        assert_eq!(query_for("whois.fi", "ficora.fi"), "ficora.fi");
    }
}
