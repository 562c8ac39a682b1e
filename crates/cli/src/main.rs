use std::io::{self, Write};

use bytes::{Buf, Bytes, BytesMut};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use emberkv_common::DEFAULT_BIND;
use emberkv_protocol::{Reply, encode_request, parse_reply};

#[derive(Parser, Debug)]
#[command(name = "emberkv-cli", about = "EmberKV CLI client")]
struct Args {
    #[arg(long, default_value = DEFAULT_BIND)]
    addr: String,

    /// Comando para executar diretamente (modo não interativo)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.addr).await?;

    // Modo comando único (via argumentos)
    if !args.command.is_empty() {
        let parts: Vec<Bytes> = args
            .command
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect();
        execute_request(&mut stream, &parts).await?;
        return Ok(());
    }

    println!("Conectado a {}", args.addr);

    let stdin = io::stdin();
    let mut input = String::new();

    loop {
        print!("emberkv> ");
        io::stdout().flush()?;

        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        let tokens = tokenize(line);
        if tokens.is_empty() {
            continue;
        }

        let parts: Vec<Bytes> = tokens
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect();
        if let Err(e) = execute_request(&mut stream, &parts).await {
            println!("(error) {e}");
            break;
        }
    }

    Ok(())
}

async fn execute_request(stream: &mut TcpStream, parts: &[Bytes]) -> anyhow::Result<()> {
    let mut buf = BytesMut::new();
    encode_request(parts, &mut buf);

    stream.write_all(&buf).await?;
    stream.flush().await?;

    let mut response_buf = BytesMut::with_capacity(4096);
    loop {
        if let Some((reply, used)) = parse_reply(&response_buf)? {
            response_buf.advance(used);
            println!("{}", format_reply(&reply));
            return Ok(());
        }

        let n = stream.read_buf(&mut response_buf).await?;
        if n == 0 {
            return Err(anyhow::anyhow!("servidor fechou a conexão"));
        }
    }
}

/// Tokeniza a linha de input com suporte a strings quoted.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut quote_char = '"';
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quote {
            if c == quote_char {
                in_quote = false;
            } else if c == '\\' {
                if let Some(&next) = chars.peek() {
                    match next {
                        'n' => {
                            current.push('\n');
                            chars.next();
                        }
                        't' => {
                            current.push('\t');
                            chars.next();
                        }
                        '\\' => {
                            current.push('\\');
                            chars.next();
                        }
                        '"' => {
                            current.push('"');
                            chars.next();
                        }
                        '\'' => {
                            current.push('\'');
                            chars.next();
                        }
                        _ => current.push(c),
                    }
                }
            } else {
                current.push(c);
            }
        } else if c == '"' || c == '\'' {
            in_quote = true;
            quote_char = c;
        } else if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Formata uma resposta para exibição humana.
fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Simple(s) => s.clone(),
        Reply::Error(s) => format!("(error) {s}"),
        Reply::Integer(n) => format!("(integer) {n}"),
        Reply::Bulk(data) => match std::str::from_utf8(data) {
            Ok(s) => format!("\"{s}\""),
            Err(_) => format!("(binário) {} bytes", data.len()),
        },
        Reply::Null => "(nil)".into(),
    }
}
