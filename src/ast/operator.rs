use std::fmt;

/// Operators of an `Operation` node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    // Unary
    UnaryPlus,
    UnaryMinus,
    LogicalNot,
    BitwiseNot,
    /// Explicit `( e )`, kept so source text survives a round trip
    Parentheses,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    /// `=?=` / `is`
    MetaEq,
    /// `=!=` / `isnt`
    MetaNe,

    // Logical
    And,
    Or,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    /// Arithmetic (sign-extending) right shift
    Shr,
    /// Logical (zero-filling) right shift
    UShr,

    Subscript,
    Ternary,
}

impl OpKind {
    /// Number of operands the operator takes
    pub fn arity(self) -> usize {
        match self {
            OpKind::UnaryPlus
            | OpKind::UnaryMinus
            | OpKind::LogicalNot
            | OpKind::BitwiseNot
            | OpKind::Parentheses => 1,
            OpKind::Ternary => 3,
            _ => 2,
        }
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            OpKind::Ternary => 0,
            OpKind::Or => 1,
            OpKind::And => 2,
            OpKind::BitOr => 3,
            OpKind::BitXor => 4,
            OpKind::BitAnd => 5,
            OpKind::Eq | OpKind::Ne | OpKind::MetaEq | OpKind::MetaNe => 6,
            OpKind::Lt | OpKind::Le | OpKind::Gt | OpKind::Ge => 7,
            OpKind::Shl | OpKind::Shr | OpKind::UShr => 8,
            OpKind::Add | OpKind::Sub => 9,
            OpKind::Mul | OpKind::Div | OpKind::Mod => 10,
            OpKind::UnaryPlus | OpKind::UnaryMinus | OpKind::LogicalNot | OpKind::BitwiseNot => 11,
            OpKind::Subscript | OpKind::Parentheses => 12,
        }
    }

    /// Operators that see Error/Undefined operands instead of propagating them
    pub fn is_strict(self) -> bool {
        !matches!(
            self,
            OpKind::MetaEq | OpKind::MetaNe | OpKind::And | OpKind::Or | OpKind::Ternary
        )
    }

    /// Associative and commutative, so flattening may regroup operands
    pub fn is_regroupable(self) -> bool {
        matches!(
            self,
            OpKind::Add | OpKind::Mul | OpKind::BitAnd | OpKind::BitOr | OpKind::BitXor
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OpKind::Lt
                | OpKind::Le
                | OpKind::Gt
                | OpKind::Ge
                | OpKind::Eq
                | OpKind::Ne
                | OpKind::MetaEq
                | OpKind::MetaNe
        )
    }

    /// Source text of the operator. Parentheses, subscript and ternary are
    /// written around their operands; their symbols are the opening parts.
    pub fn symbol(self) -> &'static str {
        match self {
            OpKind::UnaryPlus | OpKind::Add => "+",
            OpKind::UnaryMinus | OpKind::Sub => "-",
            OpKind::LogicalNot => "!",
            OpKind::BitwiseNot => "~",
            OpKind::Parentheses => "(",
            OpKind::Mul => "*",
            OpKind::Div => "/",
            OpKind::Mod => "%",
            OpKind::Lt => "<",
            OpKind::Le => "<=",
            OpKind::Gt => ">",
            OpKind::Ge => ">=",
            OpKind::Eq => "==",
            OpKind::Ne => "!=",
            OpKind::MetaEq => "=?=",
            OpKind::MetaNe => "=!=",
            OpKind::And => "&&",
            OpKind::Or => "||",
            OpKind::BitAnd => "&",
            OpKind::BitOr => "|",
            OpKind::BitXor => "^",
            OpKind::Shl => "<<",
            OpKind::Shr => ">>",
            OpKind::UShr => ">>>",
            OpKind::Subscript => "[",
            OpKind::Ternary => "?",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
