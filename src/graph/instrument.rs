//! Instrument family classification by name.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::InstrumentFamily;

// First match wins, so "double bass" lands in Strings like the bass guitar.
const FAMILY_PATTERNS: &[(&str, InstrumentFamily)] = &[
    (r"vocal|vox|voice|singing|singer", InstrumentFamily::Vocals),
    (
        r"piano|keyboard|keys|organ|synthesizer|synth|electric piano|wurlitzer|rhodes|harpsichord|clavinet|accordion",
        InstrumentFamily::Keys,
    ),
    (r"guitar|bass|banjo|mandolin|ukulele", InstrumentFamily::Strings),
    (
        r"drum|percussion|bongo|conga|tambourine|cajon|cymbal|timpani|marimba|vibraphone|xylophone",
        InstrumentFamily::Percussion,
    ),
    (r"saxophone|sax|clarinet|flute|oboe|bassoon|recorder", InstrumentFamily::Woodwind),
    (r"trumpet|trombone|horn|tuba|cornet|bugle", InstrumentFamily::Brass),
    // "double bass" never reaches here; listed for vocabulary parity only
    (r"violin|viola|cello|double bass|fiddle", InstrumentFamily::OrchestraStrings),
];

fn patterns() -> &'static [(Regex, InstrumentFamily)] {
    static COMPILED: OnceLock<Vec<(Regex, InstrumentFamily)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        FAMILY_PATTERNS
            .iter()
            .map(|(pattern, family)| (Regex::new(pattern).expect("Invalid regex pattern"), *family))
            .collect()
    })
}

/// Map an instrument name to its family; unknown names are `Other`.
pub fn classify_family(name: &str) -> InstrumentFamily {
    let lower = name.to_lowercase();
    patterns()
        .iter()
        .find(|(re, _)| re.is_match(&lower))
        .map(|(_, family)| *family)
        .unwrap_or(InstrumentFamily::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_instruments() {
        assert_eq!(classify_family("Lead Vocals"), InstrumentFamily::Vocals);
        assert_eq!(classify_family("Hammond organ"), InstrumentFamily::Keys);
        assert_eq!(classify_family("electric guitar"), InstrumentFamily::Strings);
        assert_eq!(classify_family("Drums (drum set)"), InstrumentFamily::Percussion);
        assert_eq!(classify_family("tenor saxophone"), InstrumentFamily::Woodwind);
        assert_eq!(classify_family("French horn"), InstrumentFamily::Brass);
        assert_eq!(classify_family("Cello"), InstrumentFamily::OrchestraStrings);
        assert_eq!(classify_family("theremin"), InstrumentFamily::Other);
    }

    #[test]
    fn test_order_decides_overlaps() {
        assert_eq!(classify_family("double bass"), InstrumentFamily::Strings);
        assert_eq!(classify_family("bass synthesizer"), InstrumentFamily::Keys);
        assert_eq!(classify_family("backing vocals and tambourine"), InstrumentFamily::Vocals);
    }
}
