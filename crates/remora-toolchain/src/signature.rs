//! C function signature extraction and classification.
//!
//! The pipeline does not parse whole translation units. It locates the
//! target function's definition textually (tolerating multi-line parameter
//! lists by balancing parentheses), then parses just the declaration
//! against a table of known fixed-width types. Anything the argument frame
//! cannot carry (64-bit scalars, structs, varargs) is rejected here,
//! before any subprocess runs.

use std::collections::BTreeMap;
use thiserror::Error;

/// Signature extraction and classification errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// No definition of the function was found in the entry source
    #[error("Function '{0}' not found in source")]
    FunctionNotFound(String),

    /// A parameter declaration could not be parsed
    #[error("Malformed parameter {index}: {text:?}")]
    MalformedParameter { index: usize, text: String },

    /// A value parameter or return type is not a known fixed-width type.
    ///
    /// User-defined names must be declared in the config's `[typedefs]`
    /// table to be usable by value.
    #[error("Unknown type {ty:?} for {context}")]
    UnknownType { context: String, ty: String },

    /// The type cannot cross the one-word argument frame
    #[error("Unsupported type {ty:?} for {context}: wider than one machine word")]
    UnsupportedType { context: String, ty: String },

    /// Struct/union parameters and returns are not supported
    #[error("Struct or union type for {context} is not supported")]
    StructType { context: String },

    /// Variadic functions are not supported
    #[error("Variadic functions are not supported")]
    Varargs,

    /// More parameters than argument slots
    #[error("Function has {count} parameters but only {max} argument slots are available")]
    TooManyParams { count: usize, max: usize },

    /// A configured typedef points at an unknown type
    #[error("Typedef {name:?} maps to unknown type {target:?}")]
    BadTypedef { name: String, target: String },
}

/// Fixed-width scalar kinds the argument frame can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Void,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarType {
    /// True for types wider than one 32-bit slot
    pub fn is_64bit(self) -> bool {
        matches!(self, ScalarType::I64 | ScalarType::U64 | ScalarType::F64)
    }

    /// Width in bytes (0 for void)
    pub fn width(self) -> usize {
        match self {
            ScalarType::Void => 0,
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }

    /// True for signed integer kinds
    pub fn is_signed_int(self) -> bool {
        matches!(
            self,
            ScalarType::I8 | ScalarType::I16 | ScalarType::I32 | ScalarType::I64
        )
    }
}

/// A parsed C type: base name plus pointer-ness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CType {
    /// Base type text as written, e.g. "unsigned int", "float"
    pub base: String,
    /// Resolved fixed-width kind; `None` for named types outside the table
    /// (allowed behind pointers only)
    pub scalar: Option<ScalarType>,
    /// Declared with `*` or `[]`
    pub pointer: bool,
}

impl CType {
    /// Renderable C type text, e.g. "float *"
    pub fn render(&self) -> String {
        if self.pointer {
            format!("{} *", self.base)
        } else {
            self.base.clone()
        }
    }
}

/// Parameter classification: value in the slot, or device address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Value,
    Pointer,
}

/// One parsed parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: CType,
}

impl Param {
    /// Classification is syntactic: `*` or `[]` means pointer.
    pub fn kind(&self) -> ParamKind {
        if self.ty.pointer {
            ParamKind::Pointer
        } else {
            ParamKind::Value
        }
    }
}

/// A parsed function signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub return_type: CType,
    pub params: Vec<Param>,
}

impl Signature {
    /// Check the parameter count against the frame's slot budget
    /// (the last slot is reserved for the return value).
    pub fn validate_slot_budget(&self, slot_count: usize) -> Result<(), SignatureError> {
        let max = slot_count - 1;
        if self.params.len() > max {
            return Err(SignatureError::TooManyParams {
                count: self.params.len(),
                max,
            });
        }
        Ok(())
    }
}

/// Known type names, including config-supplied typedefs.
pub struct TypeTable {
    map: BTreeMap<String, ScalarType>,
}

impl TypeTable {
    /// The standard fixed-width aliases plus the common C spellings under
    /// an ILP32 target.
    pub fn builtin() -> Self {
        let mut map = BTreeMap::new();
        let entries: &[(&str, ScalarType)] = &[
            ("void", ScalarType::Void),
            ("int8_t", ScalarType::I8),
            ("uint8_t", ScalarType::U8),
            ("int16_t", ScalarType::I16),
            ("uint16_t", ScalarType::U16),
            ("int32_t", ScalarType::I32),
            ("uint32_t", ScalarType::U32),
            ("int64_t", ScalarType::I64),
            ("uint64_t", ScalarType::U64),
            ("char", ScalarType::I8),
            ("signed char", ScalarType::I8),
            ("unsigned char", ScalarType::U8),
            ("short", ScalarType::I16),
            ("short int", ScalarType::I16),
            ("signed short", ScalarType::I16),
            ("signed short int", ScalarType::I16),
            ("unsigned short", ScalarType::U16),
            ("unsigned short int", ScalarType::U16),
            ("int", ScalarType::I32),
            ("signed", ScalarType::I32),
            ("signed int", ScalarType::I32),
            ("unsigned", ScalarType::U32),
            ("unsigned int", ScalarType::U32),
            ("long", ScalarType::I32),
            ("long int", ScalarType::I32),
            ("signed long", ScalarType::I32),
            ("unsigned long", ScalarType::U32),
            ("unsigned long int", ScalarType::U32),
            ("long long", ScalarType::I64),
            ("long long int", ScalarType::I64),
            ("signed long long", ScalarType::I64),
            ("unsigned long long", ScalarType::U64),
            ("unsigned long long int", ScalarType::U64),
            ("float", ScalarType::F32),
            ("double", ScalarType::F64),
            ("size_t", ScalarType::U32),
            ("ssize_t", ScalarType::I32),
            ("intptr_t", ScalarType::I32),
            ("uintptr_t", ScalarType::U32),
            ("bool", ScalarType::U8),
            ("_Bool", ScalarType::U8),
        ];
        for &(name, ty) in entries {
            map.insert(name.to_owned(), ty);
        }
        Self { map }
    }

    /// Builtins extended with config typedefs (`name = "int32_t"`).
    pub fn with_typedefs(typedefs: &BTreeMap<String, String>) -> Result<Self, SignatureError> {
        let mut table = Self::builtin();
        for (name, target) in typedefs {
            let scalar =
                table
                    .map
                    .get(target)
                    .copied()
                    .ok_or_else(|| SignatureError::BadTypedef {
                        name: name.clone(),
                        target: target.clone(),
                    })?;
            table.map.insert(name.clone(), scalar);
        }
        Ok(table)
    }

    fn lookup(&self, name: &str) -> Option<ScalarType> {
        self.map.get(name).copied()
    }

    /// Longest known multi-word type at the front of `words`; returns the
    /// scalar and how many words it consumed.
    fn match_prefix(&self, words: &[&str]) -> Option<(ScalarType, usize)> {
        for take in (1..=words.len().min(4)).rev() {
            let joined = words[..take].join(" ");
            if let Some(scalar) = self.lookup(&joined) {
                return Some((scalar, take));
            }
        }
        None
    }
}

/// True for a valid C identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse the signature of `function` out of `source`.
pub fn parse_signature(
    source: &str,
    function: &str,
    types: &TypeTable,
) -> Result<Signature, SignatureError> {
    let (return_text, args_text) = locate_definition(source, function)
        .ok_or_else(|| SignatureError::FunctionNotFound(function.to_owned()))?;

    let return_type = parse_return_type(&return_text, types)?;
    let params = parse_params(&args_text, types)?;

    Ok(Signature {
        name: function.to_owned(),
        return_type,
        params,
    })
}

/// Locate the definition and return `(return_type_text, args_text)`.
///
/// A definition is recognized only when the function name sits on a line
/// with its return type before it and an opening parenthesis after it; the
/// parameter list may continue across lines.
fn locate_definition(source: &str, function: &str) -> Option<(String, String)> {
    let mut offset = 0usize;
    for line in source.lines() {
        let mut search_from = 0usize;
        while let Some(pos) = line[search_from..].find(function) {
            let idx = search_from + pos;
            search_from = idx + function.len();

            // Whole-word match only.
            if idx > 0 {
                let before = line.as_bytes()[idx - 1];
                if before.is_ascii_alphanumeric() || before == b'_' {
                    continue;
                }
            }
            let after = line[idx + function.len()..].trim_start();
            if !after.starts_with('(') {
                continue;
            }

            // The text before the name must look like a return type, which
            // weeds out call sites and assignments.
            let prefix = line[..idx].trim();
            if prefix.is_empty() || !is_type_prefix(prefix) {
                continue;
            }

            // Balance parentheses from the opening paren onward, across
            // line boundaries.
            let abs = offset + idx;
            let open = abs + source[abs..].find('(')?;
            let mut depth = 0i32;
            for (i, ch) in source[open..].char_indices() {
                match ch {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            let args = &source[open + 1..open + i];
                            return Some((prefix.to_owned(), args.to_owned()));
                        }
                    }
                    _ => {}
                }
            }
            return None;
        }
        offset += line.len() + 1;
    }
    None
}

fn is_type_prefix(prefix: &str) -> bool {
    const STATEMENT_WORDS: &[&str] = &["return", "else", "case", "goto", "sizeof", "if", "while"];
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '*' || c.is_ascii_whitespace())
    {
        return false;
    }
    let first = prefix.split_whitespace().next().unwrap_or("");
    !STATEMENT_WORDS.contains(&first)
}

const QUALIFIERS: &[&str] = &[
    "const", "volatile", "restrict", "register", "static", "inline", "extern",
];

fn parse_return_type(text: &str, types: &TypeTable) -> Result<CType, SignatureError> {
    let decl = parse_decl(text, types, "return value")?;
    let ty = decl.ty;
    if decl.name.is_some() {
        // A stray identifier before the function name is not a type.
        return Err(SignatureError::UnknownType {
            context: "return value".to_owned(),
            ty: text.trim().to_owned(),
        });
    }
    if ty.pointer {
        return Ok(ty);
    }
    match ty.scalar {
        Some(ScalarType::I64) | Some(ScalarType::U64) => Err(SignatureError::UnsupportedType {
            context: "return value".to_owned(),
            ty: ty.render(),
        }),
        // f64 is allowed as a return: the wrapper truncates to float.
        Some(_) => Ok(ty),
        None => Err(SignatureError::UnknownType {
            context: "return value".to_owned(),
            ty: ty.render(),
        }),
    }
}

fn parse_params(args_text: &str, types: &TypeTable) -> Result<Vec<Param>, SignatureError> {
    let trimmed = args_text.trim();
    if trimmed.is_empty() || trimmed == "void" {
        return Ok(Vec::new());
    }

    let mut params = Vec::new();
    for (index, piece) in split_top_level(trimmed).into_iter().enumerate() {
        let context = format!("parameter {}", index);
        if piece.trim() == "..." {
            return Err(SignatureError::Varargs);
        }
        let decl = parse_decl(&piece, types, &context).map_err(|e| match e {
            SignatureError::MalformedParameter { text, .. } => {
                SignatureError::MalformedParameter { index, text }
            }
            other => other,
        })?;
        let name = decl.name.unwrap_or_else(|| format!("arg{}", index));
        let ty = decl.ty;

        if !ty.pointer {
            match ty.scalar {
                None => {
                    return Err(SignatureError::UnknownType {
                        context: format!("parameter {} ({:?})", index, name),
                        ty: ty.render(),
                    })
                }
                Some(scalar) if scalar.is_64bit() || scalar == ScalarType::Void => {
                    return Err(SignatureError::UnsupportedType {
                        context: format!("parameter {} ({:?})", index, name),
                        ty: ty.render(),
                    })
                }
                Some(_) => {}
            }
        }
        params.push(Param { name, ty });
    }
    Ok(params)
}

fn split_top_level(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in text.chars() {
        match ch {
            '(' | '[' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                pieces.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    pieces.push(current);
    pieces
}

struct Decl {
    ty: CType,
    name: Option<String>,
}

/// Parse a single declaration fragment: qualifiers, type words, optional
/// name, pointer/array markers.
fn parse_decl(text: &str, types: &TypeTable, context: &str) -> Result<Decl, SignatureError> {
    let mut pointer = false;
    let mut words: Vec<&str> = Vec::new();

    let mut chars = text.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '*' => pointer = true,
            '[' => {
                // Array declarator: consume through the closing bracket.
                pointer = true;
                for (_, c) in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i + c.len_utf8();
                while let Some(&(j, c2)) = chars.peek() {
                    if c2.is_ascii_alphanumeric() || c2 == '_' {
                        end = j + c2.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &text[start..end];
                if word == "struct" || word == "union" {
                    return Err(SignatureError::StructType {
                        context: context.to_owned(),
                    });
                }
                if !QUALIFIERS.contains(&word) {
                    words.push(word);
                }
            }
            _ => {}
        }
    }

    if words.is_empty() {
        return Err(SignatureError::MalformedParameter {
            index: 0,
            text: text.trim().to_owned(),
        });
    }

    let (scalar, consumed) = match types.match_prefix(&words) {
        Some((scalar, consumed)) => (Some(scalar), consumed),
        // Unknown named type: usable behind a pointer, refused by value
        // later. The first word is the type, anything after it the name.
        None => (None, 1),
    };
    let base = words[..consumed].join(" ");
    let name = match words.len() - consumed {
        0 => None,
        1 => Some(words[consumed].to_owned()),
        _ => {
            return Err(SignatureError::MalformedParameter {
                index: 0,
                text: text.trim().to_owned(),
            })
        }
    };

    Ok(Decl {
        ty: CType {
            base,
            scalar,
            pointer,
        },
        name,
    })
}
