use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Fua,
    PracticeOfficer,
    Coordinator,
    Secretary,
    Teacher,
    Student,
    Jury,
}

pub struct RoleInfo {
    pub role: Role,
    pub code: &'static str,
    pub label: &'static str,
    pub dashboard: &'static str,
}

/// One row per role; dashboard routing is a lookup here, never string dispatch elsewhere.
pub static ROLE_TABLE: [RoleInfo; 8] = [
    RoleInfo {
        role: Role::Admin,
        code: "ADMIN",
        label: "Administrador General",
        dashboard: "/admin/dashboard",
    },
    RoleInfo {
        role: Role::Fua,
        code: "FUA",
        label: "Encargado FUA",
        dashboard: "/fua/dashboard",
    },
    RoleInfo {
        role: Role::PracticeOfficer,
        code: "PRACTICE_OFFICER",
        label: "Encargado EFSRT",
        dashboard: "/practicas/dashboard",
    },
    RoleInfo {
        role: Role::Coordinator,
        code: "COORDINATOR",
        label: "Coordinador Academico",
        dashboard: "/coordinador/dashboard",
    },
    RoleInfo {
        role: Role::Secretary,
        code: "SECRETARY",
        label: "Secretaria",
        dashboard: "/secretaria/dashboard",
    },
    RoleInfo {
        role: Role::Teacher,
        code: "TEACHER",
        label: "Docente",
        dashboard: "/docente/dashboard",
    },
    RoleInfo {
        role: Role::Student,
        code: "STUDENT",
        label: "Estudiante",
        dashboard: "/estudiante/dashboard",
    },
    RoleInfo {
        role: Role::Jury,
        code: "JURY",
        label: "Jurado Evaluador",
        dashboard: "/jurados/dashboard",
    },
];

/// Which practices a viewer may list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PracticeScope {
    OwnAsStudent,
    Supervised,
    AssignedAsJury,
    All,
}

impl Role {
    pub fn info(self) -> &'static RoleInfo {
        // ROLE_TABLE covers every variant, in declaration order.
        &ROLE_TABLE[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        self.info().code
    }

    pub fn dashboard(self) -> &'static str {
        self.info().dashboard
    }

    pub fn parse(raw: &str) -> Option<Role> {
        let t = raw.trim();
        ROLE_TABLE
            .iter()
            .find(|r| r.code.eq_ignore_ascii_case(t))
            .map(|r| r.role)
    }

    pub fn practice_scope(self) -> PracticeScope {
        match self {
            Role::Student => PracticeScope::OwnAsStudent,
            Role::Teacher => PracticeScope::Supervised,
            Role::Jury => PracticeScope::AssignedAsJury,
            _ => PracticeScope::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PracticeState {
    Pending,
    InProgress,
    Evaluated,
}

impl PracticeState {
    pub fn as_str(self) -> &'static str {
        match self {
            PracticeState::Pending => "PENDING",
            PracticeState::InProgress => "IN_PROGRESS",
            PracticeState::Evaluated => "EVALUATED",
        }
    }

    pub fn parse(raw: &str) -> Option<PracticeState> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(PracticeState::Pending),
            "IN_PROGRESS" => Some(PracticeState::InProgress),
            "EVALUATED" => Some(PracticeState::Evaluated),
            _ => None,
        }
    }

    /// Lifecycle only moves forward; staying put is allowed.
    pub fn can_move_to(self, next: PracticeState) -> bool {
        next >= self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
        }
    }

    pub fn parse(raw: &str) -> Option<AttendanceStatus> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRESENT" => Some(AttendanceStatus::Present),
            "ABSENT" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Punctuality {
    OnTime,
    Late,
}

impl Punctuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Punctuality::OnTime => "ON_TIME",
            Punctuality::Late => "LATE",
        }
    }

    pub fn parse(raw: &str) -> Option<Punctuality> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ON_TIME" => Some(Punctuality::OnTime),
            "LATE" => Some(Punctuality::Late),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModuleKind {
    #[serde(rename = "MODULE_1")]
    Module1,
    #[serde(rename = "MODULE_2")]
    Module2,
    #[serde(rename = "MODULE_3")]
    Module3,
}

impl ModuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Module1 => "MODULE_1",
            ModuleKind::Module2 => "MODULE_2",
            ModuleKind::Module3 => "MODULE_3",
        }
    }

    pub fn parse(raw: &str) -> Option<ModuleKind> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MODULE_1" => Some(ModuleKind::Module1),
            "MODULE_2" => Some(ModuleKind::Module2),
            "MODULE_3" => Some(ModuleKind::Module3),
            _ => None,
        }
    }
}
