/// LAS classification codes written onto role-tagged output clouds
pub const UNCLASSIFIED: u8 = 1;
pub const GROUND: u8 = 2;
pub const DETECTED_OBJECT: u8 = 15;
pub const GROUND_INFILL: u8 = 11;

pub struct ClassInfo {
    pub id: u8,
    pub name: &'static str,
}

pub const CLASS_MAP: &[ClassInfo] = &[
    ClassInfo {
        id: 0,
        name: "never classified",
    },
    ClassInfo {
        id: UNCLASSIFIED,
        name: "non-ground",
    },
    ClassInfo {
        id: GROUND,
        name: "ground",
    },
    ClassInfo {
        id: GROUND_INFILL,
        name: "ground infill",
    },
    ClassInfo {
        id: DETECTED_OBJECT,
        name: "detected object",
    },
];

pub fn get_class_name(id: u8) -> String {
    CLASS_MAP
        .iter()
        .find(|c| c.id == id)
        .map_or("unknown", |c| c.name)
        .to_string()
}
