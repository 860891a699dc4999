//! XML source library (`<source_library>`), read with a tag scanner.
//!
//! Only the subset written by the AGILE tools is understood: no namespaces,
//! no CDATA, attributes always double-quoted.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;

use crate::error::AnalysisError;
use crate::source::{Parameter, SkyPosition, Source, Spectrum, SpectrumType};

/// `free="2"` on a spatial model: free, with this location limit.
const FREE_WITH_LIMIT: &str = "2";
const LIMITED_LOCATION: f64 = 2.0;

static SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<source\s+([^>]*?)>(.*?)</source\s*>").expect("source pattern is valid")
});
static SPECTRUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<spectrum\s+([^>]*?)>(.*?)</spectrum\s*>").expect("spectrum pattern is valid")
});
static SPATIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<spatialModel\s+([^>]*?)>(.*?)</spatialModel\s*>")
        .expect("spatial pattern is valid")
});
static PARAMETER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<parameter\s+([^>]*?)/?>").expect("parameter pattern is valid")
});
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w.-]*)\s*=\s*"([^"]*)""#).expect("attribute pattern is valid")
});
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"));

type Attributes = BTreeMap<String, String>;

fn attributes(raw: &str) -> Attributes {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|caps| (caps[1].to_string(), unescape(&caps[2])))
        .collect()
}

fn required<'a>(attrs: &'a Attributes, key: &str, tag: &str) -> Result<&'a str, String> {
    attrs
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| format!("<{tag}> is missing attribute {key}"))
}

fn number(attrs: &Attributes, key: &str, tag: &str) -> Result<Option<f64>, String> {
    attrs
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<f64>()
                .map_err(|_| format!("<{tag}> attribute {key} is not a number: {raw}"))
        })
        .transpose()
}

pub fn parse(path: &Utf8Path, content: &str) -> Result<Vec<Source>, AnalysisError> {
    let loading_error = |message: String| AnalysisError::SourcesFileLoadingError {
        path: path.to_path_buf(),
        message,
    };
    let content = COMMENT.replace_all(content, "");
    if !content.contains("<source_library") {
        return Err(loading_error("missing <source_library> root".to_string()));
    }
    SOURCE
        .captures_iter(&content)
        .map(|caps| parse_source(&attributes(&caps[1]), &caps[2]).map_err(&loading_error))
        .collect()
}

fn parse_source(attrs: &Attributes, body: &str) -> Result<Source, String> {
    let name = required(attrs, "name", "source")?;
    let fail = |message: String| format!("source {name}: {message}");

    let spectrum_caps = SPECTRUM
        .captures(body)
        .ok_or_else(|| fail("missing <spectrum>".to_string()))?;
    let spectrum_attrs = attributes(&spectrum_caps[1]);
    let kind: SpectrumType = required(&spectrum_attrs, "type", "spectrum")
        .map_err(&fail)?
        .parse()
        .map_err(|err: AnalysisError| fail(err.to_string()))?;
    let mut spectrum = Spectrum::new(kind);
    for param in PARAMETER.captures_iter(&spectrum_caps[2]) {
        let param_attrs = attributes(&param[1]);
        let parsed = parse_parameter(&param_attrs).map_err(&fail)?;
        let slot = spectrum.get_mut(&parsed.name).ok_or_else(|| {
            fail(format!("parameter {} does not belong to {kind}", parsed.name))
        })?;
        *slot = parsed;
    }

    let spatial_caps = SPATIAL
        .captures(body)
        .ok_or_else(|| fail("missing <spatialModel>".to_string()))?;
    let spatial_attrs = attributes(&spatial_caps[1]);
    let mut glon = None;
    let mut glat = None;
    for param in PARAMETER.captures_iter(&spatial_caps[2]) {
        let param_attrs = attributes(&param[1]);
        let value = number(&param_attrs, "value", "parameter").map_err(&fail)?;
        match param_attrs.get("name").map(String::as_str) {
            Some("GLON") => glon = value,
            Some("GLAT") => glat = value,
            _ => {}
        }
    }
    let position = match (glon, glat) {
        (Some(glon), Some(glat)) => SkyPosition::new(glon, glat),
        _ => return Err(fail("spatial model needs GLON and GLAT values".to_string())),
    };

    let mut source = Source::point(name, position, spectrum);
    if let Some(source_type) = attrs.get("type") {
        source.source_type = source_type.clone();
    }
    let location_limit = number(&spatial_attrs, "location_limit", "spatialModel")
        .map_err(&fail)?
        .unwrap_or(0.0);
    match spatial_attrs.get("free").map(String::as_str) {
        Some(FREE_WITH_LIMIT) => {
            source.spatial.free = true;
            source.spatial.location_limit = LIMITED_LOCATION;
        }
        Some(flag) => {
            source.spatial.free = parse_flag(flag).map_err(&fail)?;
            source.spatial.location_limit = location_limit;
        }
        None => source.spatial.location_limit = location_limit,
    }
    Ok(source)
}

fn parse_parameter(attrs: &Attributes) -> Result<Parameter, String> {
    let name = required(attrs, "name", "parameter")?;
    let value = number(attrs, "value", "parameter")?
        .ok_or_else(|| format!("parameter {name} has no value"))?;
    let mut param = Parameter::new(name, value);
    param.scale = number(attrs, "scale", "parameter")?.unwrap_or(1.0);
    param.min = number(attrs, "min", "parameter")?;
    param.max = number(attrs, "max", "parameter")?;
    param.free = match attrs.get("free") {
        Some(flag) => parse_flag(flag)?,
        None => false,
    };
    Ok(param)
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim() {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        other => Err(format!("invalid free flag {other}")),
    }
}

pub fn write(sources: &[Source]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<source_library title=\"source library\">\n",
    );
    for source in sources {
        out.push_str(&format!(
            "  <source name=\"{}\" type=\"{}\">\n",
            escape(&source.name),
            escape(&source.source_type)
        ));
        out.push_str(&format!(
            "    <spectrum type=\"{}\">\n",
            source.spectrum.kind
        ));
        for param in &source.spectrum.parameters {
            let mut line = format!(
                "      <parameter name=\"{}\" free=\"{}\" scale=\"{}\" value=\"{}\"",
                param.name,
                u8::from(param.free),
                param.scale,
                param.value
            );
            if let Some(min) = param.min {
                line.push_str(&format!(" min=\"{min}\""));
            }
            if let Some(max) = param.max {
                line.push_str(&format!(" max=\"{max}\""));
            }
            line.push_str("/>\n");
            out.push_str(&line);
        }
        out.push_str("    </spectrum>\n");
        out.push_str(&format!(
            "    <spatialModel type=\"PointSource\" location_limit=\"{}\" free=\"{}\">\n",
            source.spatial.location_limit,
            u8::from(source.spatial.free)
        ));
        out.push_str(&format!(
            "      <parameter name=\"GLON\" value=\"{}\"/>\n",
            source.spatial.position.glon
        ));
        out.push_str(&format!(
            "      <parameter name=\"GLAT\" value=\"{}\"/>\n",
            source.spatial.position.glat
        ));
        out.push_str("    </spatialModel>\n  </source>\n");
    }
    out.push_str("</source_library>\n");
    out
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
