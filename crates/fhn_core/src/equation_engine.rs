use crate::error::FieldError;
use crate::traits::Arith;
use std::collections::HashMap;

/// Instructions of the evaluation VM. One program is compiled per component
/// function and run over any `Arith` scalar (f64, Dual, Interval, jets).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes an exactly representable constant onto the stack.
    LoadConst(f64),
    /// Pushes a literal that binary floating point cannot hold exactly
    /// (rigorous types push an enclosing interval).
    LoadInexact(f64),
    /// Pushes state variable `i`, numbered in declaration order (`u, w, v` for FHN).
    LoadVar(usize),
    /// Pushes parameter `i`.
    LoadParam(usize),
    /// Binary operators pop `b` then `a` and push `a op b`.
    Add,
    Sub,
    Mul,
    Div,
    /// `a^n` for a literal integer `n`.
    PowI(i32),
    Sin,
    Cos,
    Exp,
    Neg,
}

/// A compiled component function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack machine without state of its own. The caller owns the scratch
/// stack, so one field can be evaluated from many rayon workers at once.
pub struct VM;

impl VM {
    /// Runs `bytecode` on `vars` and `params` and returns the value left on the stack.
    ///
    /// Compiled bytecode is balanced, so the stack never underflows; a
    /// malformed program evaluates to zero rather than panicking.
    pub fn execute<T: Arith>(
        bytecode: &Bytecode,
        vars: &[T],
        params: &[T],
        stack: &mut Vec<T>,
    ) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match op {
                OpCode::LoadConst(val) => stack.push(T::constant(*val)),
                OpCode::LoadInexact(val) => stack.push(T::inexact(*val)),
                OpCode::LoadVar(idx) => stack.push(vars[*idx].clone()),
                OpCode::LoadParam(idx) => stack.push(params[*idx].clone()),
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    let (Some(b), Some(a)) = (stack.pop(), stack.pop()) else {
                        return T::constant(0.0);
                    };
                    stack.push(match op {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        _ => a / b,
                    });
                }
                OpCode::PowI(_) | OpCode::Sin | OpCode::Cos | OpCode::Exp | OpCode::Neg => {
                    let Some(a) = stack.pop() else {
                        return T::constant(0.0);
                    };
                    stack.push(match op {
                        OpCode::PowI(n) => a.powi(*n),
                        OpCode::Sin => a.sin(),
                        OpCode::Cos => a.cos(),
                        OpCode::Exp => a.exp(),
                        _ => -a,
                    });
                }
            }
        }

        stack.pop().unwrap_or_else(|| T::constant(0.0))
    }
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    /// `+ - * / ^`
    Binary(Box<Expr>, char, Box<Expr>),
    Unary(char, Box<Expr>),
    /// `sin`, `cos` or `exp` applied to one argument.
    Call(String, Box<Expr>),
}

impl Expr {
    /// Integer value of a literal exponent such as `3` or `-(2)`.
    fn integer_literal(&self) -> Option<i32> {
        match self {
            Expr::Number(n) if n.fract() == 0.0 && n.abs() <= i32::MAX as f64 => Some(*n as i32),
            Expr::Unary('-', inner) => inner.integer_literal().map(|n| -n),
            _ => None,
        }
    }
}

/// Lowers an `Expr` to `Bytecode`, resolving names to variable or parameter slots.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map, param_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, FieldError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), FieldError> {
        match expr {
            Expr::Number(n) => {
                // Integers below 2^53 and dyadic fractions are exact in binary.
                if is_exact_literal(*n) {
                    ops.push(OpCode::LoadConst(*n));
                } else {
                    ops.push(OpCode::LoadInexact(*n));
                }
            }
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else {
                    return Err(FieldError::UnknownIdentifier(name.clone()));
                }
            }
            Expr::Binary(left, '^', right) => {
                let exponent = right.integer_literal().ok_or_else(|| {
                    FieldError::Syntax("only integer literal exponents are supported".to_string())
                })?;
                self.compile_recursive(left, ops)?;
                ops.push(OpCode::PowI(exponent));
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                match op {
                    '+' => ops.push(OpCode::Add),
                    '-' => ops.push(OpCode::Sub),
                    '*' => ops.push(OpCode::Mul),
                    '/' => ops.push(OpCode::Div),
                    _ => return Err(FieldError::Syntax(format!("unknown binary operator `{op}`"))),
                }
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => return Err(FieldError::Syntax(format!("unknown unary operator `{op}`"))),
                }
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                match func.as_str() {
                    "sin" => ops.push(OpCode::Sin),
                    "cos" => ops.push(OpCode::Cos),
                    "exp" => ops.push(OpCode::Exp),
                    _ => return Err(FieldError::Syntax(format!("unknown function `{func}`"))),
                }
            }
        }
        Ok(())
    }
}

fn is_exact_literal(n: f64) -> bool {
    // scaled by 2^20 and still integral: a short dyadic fraction
    let scaled = n * 1_048_576.0;
    n.abs() < 9.0e15 && scaled.fract() == 0.0
}

/// Recursive-descent parse of one component function.
pub fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!("Unexpected trailing input in `{}`", input.trim()));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !num_str.contains(['e', 'E']) {
                    num_str.push(d);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| format!("Malformed number `{num_str}`"))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => return Err(format!("Unexpected character `{c}`")),
            };
            tokens.push(token);
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn consume(&mut self) -> Option<Token> {
        if self.pos < self.tokens.len() {
            let t = self.tokens[self.pos].clone();
            self.pos += 1;
            Some(t)
        } else {
            None
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, String> {
        self.parse_term()
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_factor()?;

        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.consume();
                    let right = self.parse_factor()?;
                    left = Expr::Binary(Box::new(left), '+', Box::new(right));
                }
                Token::Minus => {
                    self.consume();
                    let right = self.parse_factor()?;
                    left = Expr::Binary(Box::new(left), '-', Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = Expr::Binary(Box::new(left), '*', Box::new(right));
                }
                Token::Slash => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = Expr::Binary(Box::new(left), '/', Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // Unary minus binds looser than `^`, so `-u^2` is `-(u^2)`.
    fn parse_unary(&mut self) -> Result<Expr, String> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, String> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            // right associative; the exponent may carry its own sign
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    let arg = self.parse_expression()?;
                    if let Some(Token::RParen) = self.consume() {
                        Ok(Expr::Call(name, Box::new(arg)))
                    } else {
                        Err("Expected ')'".to_string())
                    }
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                if let Some(Token::RParen) = self.consume() {
                    Ok(expr)
                } else {
                    Err("Expected ')'".to_string())
                }
            }
            _ => Err("Unexpected token".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;

    fn compile(src: &str, vars: &[&str], params: &[&str]) -> Result<Bytecode, FieldError> {
        let vars: Vec<String> = vars.iter().map(|s| s.to_string()).collect();
        let params: Vec<String> = params.iter().map(|s| s.to_string()).collect();
        let expr = parse(src).map_err(FieldError::Syntax)?;
        Compiler::new(&vars, &params).compile(&expr)
    }

    #[test]
    fn evaluates_polynomial_with_parameter() {
        let code = compile("a*x^2 - 3*x + 1", &["x"], &["a"]).expect("compiles");
        let mut stack = Vec::new();
        let value = VM::execute(&code, &[2.0], &[0.5], &mut stack);
        assert!((value - (-3.0)).abs() < 1e-15);
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        let code = compile("-x^2", &["x"], &[]).expect("compiles");
        let mut stack = Vec::new();
        assert_eq!(VM::execute(&code, &[3.0], &[], &mut stack), -9.0);
        let negative_exponent = compile("x^-1", &["x"], &[]).expect("compiles");
        assert_eq!(VM::execute(&negative_exponent, &[4.0], &[], &mut stack), 0.25);
    }

    #[test]
    fn inexact_literals_are_enclosed() {
        let code = compile("0.1", &[], &[]).expect("compiles");
        assert_eq!(code.ops, vec![OpCode::LoadInexact(0.1)]);
        let mut stack: Vec<Interval> = Vec::new();
        let value = VM::execute(&code, &[], &[], &mut stack);
        assert!(value.lo() < 0.1 && 0.1 < value.hi());
        let exact = compile("0.5 + 2", &[], &[]).expect("compiles");
        assert!(exact.ops.iter().all(|op| !matches!(op, OpCode::LoadInexact(_))));
    }

    #[test]
    fn scientific_notation_is_tokenized() {
        let code = compile("2.5e-3*x + 1E2", &["x"], &[]).expect("compiles");
        let mut stack = Vec::new();
        let value = VM::execute(&code, &[2.0], &[], &mut stack);
        assert!((value - 100.005).abs() < 1e-12);
    }

    #[test]
    fn rejects_unknown_identifiers_and_real_exponents() {
        assert!(matches!(
            compile("y + 1", &["x"], &[]),
            Err(FieldError::UnknownIdentifier(name)) if name == "y"
        ));
        assert!(matches!(compile("x^1.5", &["x"], &[]), Err(FieldError::Syntax(_))));
        assert!(parse("x + $").is_err());
        assert!(parse("(x + 1").is_err());
    }
}
