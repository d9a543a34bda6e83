//! The canned response a server-role listener sends when the first bytes off
//! a connection are neither a valid tunnel frame nor a recognized ingress
//! protocol: masquerade as a default nginx install so probes learn nothing.
const NOT_FOUND_BODY: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>Welcome to nginx!</title>
<style>
    body {
        width: 35em;
        margin: 0 auto;
        font-family: Tahoma, Verdana, Arial, sans-serif;
    }
</style>
</head>
<body>
<h1>Welcome to nginx!</h1>
<p>If you see this page, the nginx web server is successfully installed and
working. Further configuration is required.</p>

<p>For online documentation and support please refer to
<a href="http://nginx.org/">nginx.org</a>.<br/>
Commercial support is available at
<a href="http://nginx.com/">nginx.com</a>.</p>

<p><em>Thank you for using nginx.</em></p>
</body>
</html>
"#;

pub fn not_found_response() -> Vec<u8> {
    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    format!(
        "HTTP/1.1 404 Not Found\r\n\
         Server: nginx/1.22.0\r\n\
         Content-Type: text/html\r\n\
         Date: {date}\r\n\
         Cache-Control: no-cache, must-revalidate\r\n\
         Connection: keep-alive\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        NOT_FOUND_BODY.len(),
        NOT_FOUND_BODY,
    )
    .into_bytes()
}
