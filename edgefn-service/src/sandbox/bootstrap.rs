//! Bootstrap script evaluated once per isolate before user code loads. Wires
//! `globalThis.req/res/kv/console/fetch/sleep/crypto` onto the bridged ops;
//! user code never sees `Deno.core` directly.

pub const BOOTSTRAP_JS: &str = r#"
"use strict";
((globalThis) => {
  const core = Deno.core;
  const ops = core.ops;

  function freezeProto(obj) {
    return Object.freeze(obj);
  }

  // `deno_core` alone ships no Web Platform globals (those live in
  // `deno_web`/`deno_url`, which this build does not pull in); the handful
  // actually needed by the capability surface are polyfilled in plain JS.
  const B64_CHARS = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
  globalThis.btoa = (input) => {
    let out = "";
    const bytes = [...input].map((c) => c.charCodeAt(0));
    for (let i = 0; i < bytes.length; i += 3) {
      const [a, b, c] = [bytes[i], bytes[i + 1], bytes[i + 2]];
      out += B64_CHARS[a >> 2];
      out += B64_CHARS[((a & 3) << 4) | (b === undefined ? 0 : b >> 4)];
      out += b === undefined ? "=" : B64_CHARS[((b & 15) << 2) | (c === undefined ? 0 : c >> 6)];
      out += c === undefined ? "=" : B64_CHARS[c & 63];
    }
    return out;
  };
  globalThis.atob = (input) => {
    const clean = input.replace(/=+$/, "");
    let bits = 0, value = 0, out = "";
    for (const ch of clean) {
      value = (value << 6) | B64_CHARS.indexOf(ch);
      bits += 6;
      if (bits >= 8) {
        bits -= 8;
        out += String.fromCharCode((value >> bits) & 0xff);
      }
    }
    return out;
  };
  globalThis.TextEncoder = class TextEncoder {
    encode(str) { return new Uint8Array([...unescape(encodeURIComponent(str))].map((c) => c.charCodeAt(0))); }
  };
  globalThis.TextDecoder = class TextDecoder {
    constructor(_label) {}
    decode(bytes) { return decodeURIComponent(escape(String.fromCharCode(...new Uint8Array(bytes ?? [])))); }
  };
  globalThis.URLSearchParams = class URLSearchParams {
    #pairs = [];
    constructor(init) {
      if (typeof init === "string") {
        for (const part of init.replace(/^\?/, "").split("&").filter(Boolean)) {
          const [k, v] = part.split("=");
          this.#pairs.push([decodeURIComponent(k), decodeURIComponent(v ?? "")]);
        }
      } else if (init) {
        for (const [k, v] of Object.entries(init)) this.#pairs.push([k, String(v)]);
      }
    }
    get(k) { return this.#pairs.find(([key]) => key === k)?.[1] ?? null; }
    getAll(k) { return this.#pairs.filter(([key]) => key === k).map(([, v]) => v); }
    has(k) { return this.#pairs.some(([key]) => key === k); }
    set(k, v) { this.#pairs = this.#pairs.filter(([key]) => key !== k); this.#pairs.push([k, String(v)]); }
    append(k, v) { this.#pairs.push([k, String(v)]); }
    [Symbol.iterator]() { return this.#pairs[Symbol.iterator](); }
    toString() { return this.#pairs.map(([k, v]) => `${encodeURIComponent(k)}=${encodeURIComponent(v)}`).join("&"); }
  };
  globalThis.URL = class URL {
    constructor(input, base) {
      const full = base && !/^[a-z]+:\/\//i.test(input) ? new URL(base).origin + (input.startsWith("/") ? "" : "/") + input : input;
      const m = /^([a-z]+):\/\/([^/?#]*)(\/[^?#]*)?(?:\?([^#]*))?(?:#(.*))?$/i.exec(full) ?? [];
      this.protocol = `${m[1] ?? "http"}:`;
      this.host = m[2] ?? "";
      this.pathname = m[3] ?? "/";
      this.search = m[4] ? `?${m[4]}` : "";
      this.hash = m[5] ? `#${m[5]}` : "";
      this.origin = `${this.protocol}//${this.host}`;
      this.searchParams = new URLSearchParams(m[4] ?? "");
    }
    toString() { return `${this.origin}${this.pathname}${this.search}${this.hash}`; }
  };

  class Headers {
    #map = new Map();
    constructor(init) {
      if (init) {
        for (const [k, v] of Object.entries(init)) this.#map.set(k.toLowerCase(), String(v));
      }
    }
    get(k) { return this.#map.get(k.toLowerCase()) ?? null; }
    set(k, v) { this.#map.set(k.toLowerCase(), String(v)); }
    has(k) { return this.#map.has(k.toLowerCase()); }
    delete(k) { this.#map.delete(k.toLowerCase()); }
    append(k, v) {
      const existing = this.get(k);
      this.set(k, existing ? `${existing}, ${v}` : v);
    }
    entries() { return this.#map.entries(); }
  }
  globalThis.Headers = Headers;

  let responseSent = false;

  function makeReq(descriptor) {
    const url = new URL(descriptor.path + (descriptor.query ? `?${descriptor.query}` : ""), "http://sandbox.local");
    return freezeProto({
      method: descriptor.method,
      url: descriptor.path,
      path: url.pathname,
      query: Object.fromEntries(url.searchParams),
      headers: new Headers(descriptor.headers),
      ip: descriptor.clientIp ?? null,
      body: descriptor.body ? core.decode(new Uint8Array(descriptor.body)) : null,
      accepts(type) {
        const accept = descriptor.headers["accept"] ?? "*/*";
        return accept.includes(type) || accept.includes("*/*");
      },
    });
  }

  function makeRes() {
    const state = { status: 200, headers: new Headers(), body: null };
    const res = {
      status(n) { state.status = n; return res; },
      set(k, v) {
        if (typeof k === "object") { for (const [hk, hv] of Object.entries(k)) state.headers.set(hk, hv); }
        else state.headers.set(k, v);
        return res;
      },
      get(k) { return state.headers.get(k); },
      setHeader(k, v) { return res.set(k, v); },
      removeHeader(k) { state.headers.delete(k); return res; },
      append(k, v) { state.headers.append(k, v); return res; },
      type(mime) { state.headers.set("content-type", mime); return res; },
      cookie(name, value, opts) {
        const parts = [`${name}=${value}`];
        if (opts?.maxAge) parts.push(`Max-Age=${opts.maxAge}`);
        if (opts?.path) parts.push(`Path=${opts.path}`);
        if (opts?.httpOnly) parts.push("HttpOnly");
        state.headers.append("set-cookie", parts.join("; "));
        return res;
      },
      clearCookie(name) { return res.cookie(name, "", { maxAge: 0 }); },
      sendStatus(n) { state.status = n; return res.end(); },
      send(body) {
        if (typeof body === "object" && body !== null && !(body instanceof Uint8Array)) return res.json(body);
        state.body = body == null ? null : String(body);
        return finish();
      },
      json(obj) {
        state.headers.set("content-type", "application/json");
        state.body = JSON.stringify(obj);
        return finish();
      },
      end(data) { if (data !== undefined) state.body = String(data); return finish(); },
      redirect(codeOrUrl, maybeUrl) {
        const code = maybeUrl ? codeOrUrl : 302;
        const target = maybeUrl ?? codeOrUrl;
        state.status = code;
        state.headers.set("location", target);
        return finish();
      },
      sendFile() { throw new Error("sendFile is not supported in this sandbox"); },
      download() { throw new Error("download is not supported in this sandbox"); },
      pipeFrom(fetchResp) {
        state.status = fetchResp.status;
        state.body = fetchResp.bodyText;
        return finish();
      },
    };
    function finish() {
      if (responseSent) throw new Error("response already sent");
      responseSent = true;
      ops.op_res_finish(state.status, Object.fromEntries(state.headers.entries()), state.body ?? "");
      return res;
    }
    return res;
  }

  globalThis.__edgefn_invoke = async (descriptorJson, handler) => {
    responseSent = false;
    const descriptor = JSON.parse(descriptorJson);
    const req = makeReq(descriptor);
    const res = makeRes();
    try {
      await handler(req, res);
    } catch (err) {
      if (!responseSent) {
        ops.op_invocation_error(String(err?.stack ?? err));
      }
      return;
    }
  };

  globalThis.console = {
    log: (...args) => ops.op_console_log("info", args.map((a) => core.stringify?.(a) ?? String(a)).join(" ")),
    info: (...args) => ops.op_console_log("info", args.join(" ")),
    warn: (...args) => ops.op_console_log("warn", args.join(" ")),
    error: (...args) => ops.op_console_log("error", args.join(" ")),
  };

  globalThis.sleep = (ms) => core.opAsync("op_sleep_ms", ms);

  globalThis.kv = {
    get: (key) => ops.op_kv_get(key).then((v) => v === undefined ? null : JSON.parse(v)),
    set: (key, value) => ops.op_kv_set(key, JSON.stringify(value)),
    has: (key) => ops.op_kv_has(key),
    delete: (key) => ops.op_kv_delete(key),
    clear: () => ops.op_kv_clear(),
  };

  globalThis.fetch = async (url, opts) => {
    const result = await ops.op_fetch(
      String(url),
      opts?.method ?? "GET",
      opts?.headers ?? {},
      opts?.body ?? null,
    );
    return {
      status: result.status,
      ok: result.status >= 200 && result.status < 300,
      headers: new Headers(result.headers),
      bodyText: result.body,
      text: async () => result.body,
      json: async () => JSON.parse(result.body),
    };
  };

  globalThis.crypto = globalThis.crypto ?? {};
  globalThis.crypto.randomUUID = () => ops.op_crypto_random_uuid();
  globalThis.__edgefn_crypto = {
    randomBytesB64: (len) => ops.op_crypto_random_bytes(len),
    digestB64: (algorithm, dataB64) => ops.op_crypto_digest(algorithm, dataB64),
    hmacB64: (keyB64, dataB64) => ops.op_crypto_hmac(keyB64, dataB64),
  };
})(globalThis);
"#;
