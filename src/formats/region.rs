use crate::source::Source;

const HEADER: &str = "# Region file format: DS9 version 4.1\n\
global color=green dashlist=8 3 width=1 font=\"helvetica 10 normal roman\" \
select=1 highlite=1 dash=0 fixed=0 edit=1 move=1 delete=1 include=1 source=1\n\
galactic\n";

/// ds9 region file marking each source at its effective position.
pub fn write(sources: &[Source]) -> String {
    let mut out = String::from(HEADER);
    for source in sources {
        let position = source.effective_position();
        out.push_str(&format!(
            "point({},{}) # point=cross text={{{}}}\n",
            position.glon, position.glat, source.name
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SkyPosition, Spectrum, SpectrumType};

    #[test]
    fn one_cross_per_source() {
        let sources = vec![Source::point(
            "CYGX3",
            SkyPosition::new(79.8, 0.7),
            Spectrum::new(SpectrumType::PowerLaw),
        )];
        let region = write(&sources);
        assert!(region.starts_with("# Region file format: DS9"));
        assert!(region.contains("\ngalactic\n"));
        assert!(region.ends_with("point(79.8,0.7) # point=cross text={CYGX3}\n"));
    }
}
